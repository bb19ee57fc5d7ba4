//! Signing-method families.
//!
//! The parser trusts a family, never the token's self-declared algorithm.
//! Families are an exhaustive enum so adding an algorithm upstream is a
//! compile error here rather than a silently accepted method.

use std::fmt;
use std::str::FromStr;

use jsonwebtoken::Algorithm;

/// Family of signing algorithms that share a key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodFamily {
    /// Symmetric HMAC (HS256, HS384, HS512).
    Hmac,
    /// RSASSA-PKCS1-v1_5 (RS256, RS384, RS512).
    Rsa,
    /// RSASSA-PSS (PS256, PS384, PS512).
    RsaPss,
    /// ECDSA (ES256, ES384).
    Ecdsa,
    /// Ed25519.
    EdDsa,
}

impl MethodFamily {
    #[must_use]
    pub const fn of(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Self::Hmac,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => Self::Rsa,
            Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512 => Self::RsaPss,
            Algorithm::ES256 | Algorithm::ES384 => Self::Ecdsa,
            Algorithm::EdDSA => Self::EdDsa,
        }
    }

    /// All algorithms accepted when this family is trusted.
    #[must_use]
    pub const fn algorithms(self) -> &'static [Algorithm] {
        match self {
            Self::Hmac => &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512],
            Self::Rsa => &[Algorithm::RS256, Algorithm::RS384, Algorithm::RS512],
            Self::RsaPss => &[Algorithm::PS256, Algorithm::PS384, Algorithm::PS512],
            Self::Ecdsa => &[Algorithm::ES256, Algorithm::ES384],
            Self::EdDsa => &[Algorithm::EdDSA],
        }
    }

    #[must_use]
    pub const fn is_symmetric(self) -> bool {
        matches!(self, Self::Hmac)
    }

    #[must_use]
    pub fn contains(self, algorithm: Algorithm) -> bool {
        Self::of(algorithm) == self
    }
}

impl fmt::Display for MethodFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hmac => "hmac",
            Self::Rsa => "rsa",
            Self::RsaPss => "rsa-pss",
            Self::Ecdsa => "ecdsa",
            Self::EdDsa => "eddsa",
        })
    }
}

/// Parse an algorithm name such as `HS256` or `es384` (case-insensitive).
///
/// # Errors
/// Returns a message naming the unsupported algorithm.
pub fn parse_algorithm(s: &str) -> Result<Algorithm, String> {
    let upper = s.trim().to_uppercase();
    let name = if upper == "EDDSA" { "EdDSA" } else { upper.as_str() };
    Algorithm::from_str(name).map_err(|_| format!("Unsupported signing algorithm: {s}"))
}
