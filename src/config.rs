//! Pipeline configuration with validation at startup.
//!
//! Key material, token lifetimes and limiter quotas for services that embed
//! the pipeline. The factory methods turn a validated [`Config`] into the
//! collaborators the pipeline builders expect.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser as _;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use pipeline_telemetry::TelemetryConfig;
use secrecy::{ExposeSecret, SecretString};

use crate::auth::{Claims, MethodFamily, Parser, Signer, StaticKey, parse_algorithm};

/// Minimum HMAC secret length (256 bits).
const MIN_HMAC_SECRET_LEN: usize = 32;

/// Pipeline configuration.
///
/// All values can be set via environment variables or CLI arguments.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "rpc-pipeline", about = "RPC endpoint pipeline")]
pub struct Config {
    /// Signing key: HMAC secret, or PEM private key for asymmetric methods
    #[arg(long, env = "TOKEN_SIGNING_KEY")]
    pub signing_key: SecretString,

    /// PEM public key (required for asymmetric methods)
    #[arg(long, env = "TOKEN_VERIFICATION_KEY")]
    pub verification_key: Option<String>,

    /// Signing method (HS256, RS256, ES256, EdDSA, ...)
    #[arg(long, env = "TOKEN_ALGORITHM", default_value = "HS256")]
    pub algorithm: String,

    /// Key id advertised in the token header
    #[arg(long, env = "TOKEN_KEY_ID")]
    pub key_id: Option<String>,

    /// Token issuer (`iss`), stamped by the signer and required by the parser
    #[arg(long, env = "TOKEN_ISSUER")]
    pub issuer: Option<String>,

    /// Token TTL in seconds
    #[arg(long, env = "TOKEN_TTL_SECS", default_value = "300")]
    pub token_ttl_secs: u64,

    /// Clock skew tolerated on `exp`/`nbf`, in seconds
    #[arg(long, env = "TOKEN_LEEWAY_SECS", default_value = "60")]
    pub leeway_secs: u64,

    /// Calls per second admitted by the client-side limiter
    #[arg(long, env = "RATE_LIMIT_RPS", default_value = "100")]
    pub rate_limit_rps: u32,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Use JSON log format
    #[arg(long, env = "JSON_LOGS", default_value = "true")]
    pub json_logs: bool,
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("HMAC secret must be at least {MIN_HMAC_SECRET_LEN} bytes")]
    SigningKeyTooShort,
    #[error("{0:?} requires a verification key")]
    MissingVerificationKey(Algorithm),
    #[error("invalid key material: {0}")]
    InvalidKey(#[from] jsonwebtoken::errors::Error),
    #[error("Token TTL must be > 0")]
    InvalidTokenTtl,
    #[error("Rate limit must be > 0")]
    InvalidRateLimit,
}

impl Config {
    /// Parse and validate configuration.
    pub fn init() -> anyhow::Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let algorithm = self.algorithm()?;
        let family = MethodFamily::of(algorithm);

        if family.is_symmetric() {
            if self.signing_key.expose_secret().len() < MIN_HMAC_SECRET_LEN {
                return Err(ConfigError::SigningKeyTooShort);
            }
        } else if self.verification_key.is_none() {
            return Err(ConfigError::MissingVerificationKey(algorithm));
        }
        if self.token_ttl_secs == 0 {
            return Err(ConfigError::InvalidTokenTtl);
        }
        if self.rate_limit_rps == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }
        Ok(())
    }

    /// Configured signing method.
    ///
    /// # Errors
    /// Returns `UnsupportedAlgorithm` for unknown names.
    pub fn algorithm(&self) -> Result<Algorithm, ConfigError> {
        parse_algorithm(&self.algorithm).map_err(ConfigError::UnsupportedAlgorithm)
    }

    #[inline]
    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Key used by the signer.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the PEM cannot be parsed.
    pub fn encoding_key(&self) -> Result<EncodingKey, ConfigError> {
        let secret = self.signing_key.expose_secret().as_bytes();
        let key = match MethodFamily::of(self.algorithm()?) {
            MethodFamily::Hmac => EncodingKey::from_secret(secret),
            MethodFamily::Rsa | MethodFamily::RsaPss => EncodingKey::from_rsa_pem(secret)?,
            MethodFamily::Ecdsa => EncodingKey::from_ec_pem(secret)?,
            MethodFamily::EdDsa => EncodingKey::from_ed_pem(secret)?,
        };
        Ok(key)
    }

    /// Key used by the parser. HMAC reuses the signing secret.
    ///
    /// # Errors
    /// Returns `MissingVerificationKey` or `InvalidKey`.
    pub fn decoding_key(&self) -> Result<DecodingKey, ConfigError> {
        let algorithm = self.algorithm()?;
        let family = MethodFamily::of(algorithm);
        let pem = || {
            self.verification_key
                .as_deref()
                .map(str::as_bytes)
                .ok_or(ConfigError::MissingVerificationKey(algorithm))
        };

        let key = match family {
            MethodFamily::Hmac => {
                DecodingKey::from_secret(self.signing_key.expose_secret().as_bytes())
            }
            MethodFamily::Rsa | MethodFamily::RsaPss => DecodingKey::from_rsa_pem(pem()?)?,
            MethodFamily::Ecdsa => DecodingKey::from_ec_pem(pem()?)?,
            MethodFamily::EdDsa => DecodingKey::from_ed_pem(pem()?)?,
        };
        Ok(key)
    }

    /// Signer stamping `claims` plus `iss`, lifetime claims and a `jti`.
    ///
    /// # Errors
    /// Returns the key or algorithm error.
    pub fn signer(&self, mut claims: Claims) -> Result<Signer, ConfigError> {
        if let Some(issuer) = &self.issuer {
            claims.insert("iss", issuer.as_str());
        }
        let mut signer = Signer::new(self.encoding_key()?, self.algorithm()?, claims)
            .with_ttl(self.token_ttl())
            .with_unique_id();
        if let Some(kid) = &self.key_id {
            signer = signer.with_key_id(kid.as_str());
        }
        Ok(signer)
    }

    /// Parser trusting the configured method family and key.
    ///
    /// # Errors
    /// Returns the key or algorithm error.
    pub fn parser(&self) -> Result<Parser, ConfigError> {
        let mut parser = Parser::new(StaticKey::new(self.decoding_key()?), self.algorithm()?)
            .with_leeway(self.leeway_secs);
        if let Some(issuer) = &self.issuer {
            parser = parser.with_issuer(&[issuer]);
        }
        Ok(parser)
    }

    /// Limiter admitting `rate_limit_rps` calls per second, shared by every
    /// endpoint it is handed to.
    ///
    /// # Errors
    /// Returns `InvalidRateLimit` for a zero rate.
    pub fn rate_limiter(&self) -> Result<Arc<DefaultDirectRateLimiter>, ConfigError> {
        let rps = NonZeroU32::new(self.rate_limit_rps).ok_or(ConfigError::InvalidRateLimit)?;
        Ok(Arc::new(RateLimiter::direct(Quota::per_second(rps))))
    }

    #[must_use]
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level.clone(),
            json_logs: self.json_logs,
        }
    }
}
