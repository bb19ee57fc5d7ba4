//! Verification-key resolution.
//!
//! A [`KeyFunc`] picks the verification key for one specific token, which is
//! what makes key rotation and multi-issuer setups possible. Implementations
//! may perform I/O and must be safe to call concurrently.

use std::collections::HashMap;

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use thiserror::Error;

use super::TokenMetadata;

/// Key resolution errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("token has no key id")]
    MissingKeyId,
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),
    #[error("key source unavailable: {0}")]
    Unavailable(String),
}

/// Resolve the verification key for a token.
#[async_trait]
pub trait KeyFunc: Send + Sync {
    /// Called only after the token's method family has been checked.
    async fn resolve(&self, token: &TokenMetadata) -> Result<DecodingKey, KeyError>;
}

#[async_trait]
impl<F> KeyFunc for F
where
    F: Fn(&TokenMetadata) -> Result<DecodingKey, KeyError> + Send + Sync,
{
    async fn resolve(&self, token: &TokenMetadata) -> Result<DecodingKey, KeyError> {
        self(token)
    }
}

/// A single fixed key for every token.
#[derive(Clone)]
pub struct StaticKey(DecodingKey);

impl StaticKey {
    #[must_use]
    pub const fn new(key: DecodingKey) -> Self {
        Self(key)
    }

    /// Shared HMAC secret.
    #[must_use]
    pub fn hmac(secret: &[u8]) -> Self {
        Self(DecodingKey::from_secret(secret))
    }
}

#[async_trait]
impl KeyFunc for StaticKey {
    async fn resolve(&self, _token: &TokenMetadata) -> Result<DecodingKey, KeyError> {
        Ok(self.0.clone())
    }
}

/// Keys selected by the token's `kid` header.
///
/// Several keys can be active at once during a rotation. Tokens without a
/// `kid` fall back to the default key when one is configured.
#[derive(Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, DecodingKey>,
    default: Option<DecodingKey>,
}

impl KeySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_key(mut self, kid: impl Into<String>, key: DecodingKey) -> Self {
        self.keys.insert(kid.into(), key);
        self
    }

    #[must_use]
    pub fn with_default(mut self, key: DecodingKey) -> Self {
        self.default = Some(key);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.default.is_none()
    }

    fn lookup(&self, token: &TokenMetadata) -> Result<DecodingKey, KeyError> {
        match token.key_id() {
            Some(kid) => self
                .keys
                .get(kid)
                .cloned()
                .ok_or_else(|| KeyError::UnknownKeyId(kid.to_string())),
            None => self.default.clone().ok_or(KeyError::MissingKeyId),
        }
    }
}

#[async_trait]
impl KeyFunc for KeySet {
    async fn resolve(&self, token: &TokenMetadata) -> Result<DecodingKey, KeyError> {
        self.lookup(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

    fn metadata(kid: Option<&str>) -> TokenMetadata {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        let token = encode(&header, &Claims::new(), &EncodingKey::from_secret(b"k")).unwrap();
        TokenMetadata::parse(&token).unwrap()
    }

    #[tokio::test]
    async fn key_set_selects_by_kid() {
        let keys = KeySet::new()
            .with_key("old", DecodingKey::from_secret(b"old"))
            .with_key("new", DecodingKey::from_secret(b"new"));

        assert!(keys.resolve(&metadata(Some("old"))).await.is_ok());
        assert!(keys.resolve(&metadata(Some("new"))).await.is_ok());
        assert!(matches!(
            keys.resolve(&metadata(Some("gone"))).await,
            Err(KeyError::UnknownKeyId(kid)) if kid == "gone"
        ));
        assert!(matches!(
            keys.resolve(&metadata(None)).await,
            Err(KeyError::MissingKeyId)
        ));
    }

    #[tokio::test]
    async fn key_set_falls_back_to_default() {
        let keys = KeySet::new().with_default(DecodingKey::from_secret(b"d"));
        assert!(keys.resolve(&metadata(None)).await.is_ok());
        assert!(!keys.is_empty());
        assert_eq!(keys.len(), 0);
    }

    #[tokio::test]
    async fn closures_are_key_funcs() {
        let reject = |_: &TokenMetadata| -> Result<DecodingKey, KeyError> {
            Err(KeyError::Unavailable("vault sealed".into()))
        };
        assert!(matches!(
            reject.resolve(&metadata(None)).await,
            Err(KeyError::Unavailable(_))
        ));
    }
}
