//! Client-side token signing middleware.
//!
//! Mints a bearer token per call and places it in the [`CallContext`] for the
//! stage nearest the wire to encode. The request and response pass through
//! untouched.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use tower::{Layer, Service};
use tracing::{debug, error};
use uuid::Uuid;

use super::{BearerToken, Claims};
use crate::endpoint::Call;
use crate::error::Failure;

/// Signs a claims template with a fixed key and method.
///
/// Stateless across calls apart from the key material it closes over.
pub struct Signer {
    key: EncodingKey,
    header: Header,
    claims: Claims,
    ttl: Option<Duration>,
    unique_id: bool,
}

impl Signer {
    #[must_use]
    pub fn new(key: EncodingKey, algorithm: Algorithm, claims: Claims) -> Self {
        Self {
            key,
            header: Header::new(algorithm),
            claims,
            ttl: None,
            unique_id: false,
        }
    }

    /// Advertise the signing key's id in the token header.
    #[must_use]
    pub fn with_key_id(mut self, kid: impl Into<String>) -> Self {
        self.header.kid = Some(kid.into());
        self
    }

    /// Stamp `iat`, `nbf` and `exp` on every token.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Stamp a fresh `jti` on every token.
    #[must_use]
    pub fn with_unique_id(mut self) -> Self {
        self.unique_id = true;
        self
    }

    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    /// Sign the template claims.
    ///
    /// # Errors
    /// Returns `Failure::Signing` when the key does not fit the algorithm or
    /// the claims cannot be encoded.
    pub fn sign(&self) -> Result<BearerToken, Failure> {
        let mut claims = self.claims.clone();

        if let Some(ttl) = self.ttl {
            let now = Utc::now().timestamp();
            let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
            claims.insert("iat", now);
            claims.insert("nbf", now);
            claims.insert("exp", now.saturating_add(ttl));
        }
        if self.unique_id {
            claims.insert("jti", Uuid::new_v4().to_string());
        }

        match encode(&self.header, &claims, &self.key) {
            Ok(token) => {
                debug!(algorithm = ?self.header.alg, kid = ?self.header.kid, "Signed bearer token");
                Ok(BearerToken::from(token))
            }
            Err(e) => {
                error!(algorithm = ?self.header.alg, error = %e, "Token signing failed");
                Err(Failure::Signing(e.to_string()))
            }
        }
    }
}

/// Tower layer that signs a token before every call.
#[derive(Clone)]
pub struct SignerLayer {
    signer: Arc<Signer>,
}

impl SignerLayer {
    #[must_use]
    pub fn new(key: EncodingKey, algorithm: Algorithm, claims: Claims) -> Self {
        Self::from_signer(Signer::new(key, algorithm, claims))
    }

    #[must_use]
    pub fn from_signer(signer: Signer) -> Self {
        Self::from_shared(Arc::new(signer))
    }

    #[must_use]
    pub const fn from_shared(signer: Arc<Signer>) -> Self {
        Self { signer }
    }
}

impl<S> Layer<S> for SignerLayer {
    type Service = SignerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SignerService {
            inner,
            signer: Arc::clone(&self.signer),
        }
    }
}

/// Token signing middleware service.
#[derive(Clone)]
pub struct SignerService<S> {
    inner: S,
    signer: Arc<Signer>,
}

impl<S, Req> Service<Call<Req>> for SignerService<S>
where
    S: Service<Call<Req>, Error = Failure> + Clone + Send + 'static,
    S::Future: Send,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = Failure;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        // Keep the readied service, hand the clone back to `self`
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        match self.signer.sign() {
            Ok(token) => {
                let call = call.map_context(|ctx| ctx.with_token(token));
                Box::pin(async move { inner.call(call).await })
            }
            Err(failure) => Box::pin(async move { Err(failure) }),
        }
    }
}
