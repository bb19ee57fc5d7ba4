//! Bearer tokens, claims, and unverified token metadata.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AuthError;

/// Signed, opaque bearer token string.
///
/// Cheap to clone. `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(Arc<str>);

impl BearerToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

impl From<String> for BearerToken {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&str> for BearerToken {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

/// Mapping of claim name to value, as embedded in a token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Subject (`sub`).
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    /// Expiration time (`exp`) as a Unix timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.get("exp").and_then(Value::as_i64)
    }

    /// Not-before time (`nbf`) as a Unix timestamp.
    #[must_use]
    pub fn not_before(&self) -> Option<i64> {
        self.get("nbf").and_then(Value::as_i64)
    }

    /// Issued-at time (`iat`) as a Unix timestamp.
    #[must_use]
    pub fn issued_at(&self) -> Option<i64> {
        self.get("iat").and_then(Value::as_i64)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Claims {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Decoded but UNVERIFIED header and claims of a token.
///
/// Handed to a [`KeyFunc`](super::KeyFunc) so it can pick a key (usually by
/// `kid`). Nothing in here may be trusted until the signature is verified.
#[derive(Debug, Clone)]
pub struct TokenMetadata {
    header: Header,
    claims: Claims,
}

impl TokenMetadata {
    /// Structurally parse a compact JWS: three segments, JSON header and payload.
    ///
    /// # Errors
    /// Returns `AuthError::MalformedToken` describing the first structural defect.
    pub fn parse(token: &str) -> Result<Self, AuthError> {
        let mut segments = token.split('.');
        let (Some(_), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(malformed("expected three segments"));
        };
        if signature.is_empty() {
            return Err(malformed("missing signature"));
        }

        let header = jsonwebtoken::decode_header(token).map_err(|e| malformed(&e.to_string()))?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| malformed(&format!("payload encoding: {e}")))?;
        let claims = serde_json::from_slice(&payload)
            .map_err(|e| malformed(&format!("payload json: {e}")))?;

        Ok(Self { header, claims })
    }

    /// Algorithm the token declares for itself.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    #[must_use]
    pub const fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub const fn unverified_claims(&self) -> &Claims {
        &self.claims
    }
}

fn malformed(reason: &str) -> AuthError {
    AuthError::MalformedToken(reason.to_string())
}
