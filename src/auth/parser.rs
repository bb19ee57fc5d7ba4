//! Server-side token parsing middleware.
//!
//! Authenticates an inbound call from the bearer token the transport placed in
//! the [`CallContext`] and exposes the verified [`Claims`] downstream.
//!
//! # Verification order
//! 1. Token present in the context, else `MissingToken`
//! 2. Structural parse, else `MalformedToken`
//! 3. Declared method belongs to the trusted family, else `UnexpectedSigningMethod`
//! 4. `KeyFunc` resolves a key, else `KeyResolution`
//! 5. Signature and `exp`/`nbf` verify, else `InvalidToken`
//!
//! Step 3 runs before the key is resolved: letting the token's own `alg`
//! choose the verification path is the algorithm-confusion attack.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use jsonwebtoken::{Algorithm, Validation, decode};
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::{Claims, KeyFunc, MethodFamily, TokenMetadata};
use crate::context::CallContext;
use crate::endpoint::Call;
use crate::error::{AuthError, Failure};

/// Verifies bearer tokens against a trusted method family.
pub struct Parser {
    key_func: Arc<dyn KeyFunc>,
    family: MethodFamily,
    validation: Validation,
}

impl Parser {
    #[must_use]
    pub fn new(key_func: impl KeyFunc + 'static, expected: Algorithm) -> Self {
        Self::with_shared_keys(Arc::new(key_func), expected)
    }

    /// Build a parser over a key source shared with other parsers.
    #[must_use]
    pub fn with_shared_keys(key_func: Arc<dyn KeyFunc>, expected: Algorithm) -> Self {
        let family = MethodFamily::of(expected);

        let mut validation = Validation::new(expected);
        validation.algorithms = family.algorithms().to_vec();
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            key_func,
            family,
            validation,
        }
    }

    /// Require `aud` to contain one of `audience`.
    #[must_use]
    pub fn with_audience<T: ToString>(mut self, audience: &[T]) -> Self {
        self.validation.set_audience(audience);
        self.validation.validate_aud = true;
        self
    }

    /// Require `iss` to be one of `issuer`.
    #[must_use]
    pub fn with_issuer<T: ToString>(mut self, issuer: &[T]) -> Self {
        self.validation.set_issuer(issuer);
        self
    }

    /// Clock skew tolerated on `exp` and `nbf`, in seconds. None by default.
    #[must_use]
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }

    #[must_use]
    pub const fn family(&self) -> MethodFamily {
        self.family
    }

    /// Verify the token carried by `ctx` and return its claims.
    ///
    /// # Errors
    /// Returns `Failure::Auth` with the kind of the first failed step, or
    /// `Failure::Cancelled` / `Failure::DeadlineExceeded` if the call was
    /// abandoned before or during key resolution.
    pub async fn parse(&self, ctx: &CallContext) -> Result<Claims, Failure> {
        let token = ctx.token().ok_or(AuthError::MissingToken)?;
        let metadata = TokenMetadata::parse(token.as_str())?;

        if !self.family.contains(metadata.algorithm()) {
            return Err(AuthError::UnexpectedSigningMethod(metadata.algorithm()).into());
        }

        ctx.check()?;
        let key = ctx
            .run(async {
                self.key_func
                    .resolve(&metadata)
                    .await
                    .map_err(|e| Failure::from(AuthError::KeyResolution(e.to_string())))
            })
            .await?;

        let data = decode::<Claims>(token.as_str(), &key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        self.check_time_claims(&data.claims)?;

        Ok(data.claims)
    }

    /// Reject `exp`/`nbf` values that are not a NumericDate, and compare the
    /// ones that are not whole seconds, which the decoder skips.
    fn check_time_claims(&self, claims: &Claims) -> Result<(), AuthError> {
        let now = Utc::now().timestamp() as f64;
        let leeway = self.validation.leeway as f64;

        for name in ["exp", "nbf"] {
            let Some(value) = claims.get(name) else {
                continue;
            };
            if value.as_u64().is_some() {
                continue;
            }
            let at = value
                .as_f64()
                .filter(|at| at.is_finite() && *at >= 0.0)
                .ok_or_else(|| AuthError::InvalidToken(format!("{name} is not a NumericDate")))?;
            let violated = match name {
                "exp" => at < now - leeway,
                _ => at > now + leeway,
            };
            if violated {
                return Err(AuthError::InvalidToken(format!("{name} check failed")));
            }
        }
        Ok(())
    }
}

/// Tower layer that authenticates every call before it reaches the endpoint.
#[derive(Clone)]
pub struct ParserLayer {
    parser: Arc<Parser>,
}

impl ParserLayer {
    #[must_use]
    pub fn new(key_func: impl KeyFunc + 'static, expected: Algorithm) -> Self {
        Self::from_parser(Parser::new(key_func, expected))
    }

    #[must_use]
    pub fn from_parser(parser: Parser) -> Self {
        Self {
            parser: Arc::new(parser),
        }
    }
}

impl<S> Layer<S> for ParserLayer {
    type Service = ParserService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ParserService {
            inner,
            parser: Arc::clone(&self.parser),
        }
    }
}

/// Token parsing middleware service.
#[derive(Clone)]
pub struct ParserService<S> {
    inner: S,
    parser: Arc<Parser>,
}

impl<S, Req> Service<Call<Req>> for ParserService<S>
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
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let parser = Arc::clone(&self.parser);

        Box::pin(async move {
            match parser.parse(&call.context).await {
                Ok(claims) => {
                    debug!(sub = claims.subject(), "Authenticated");
                    inner.call(call.map_context(|ctx| ctx.with_claims(claims))).await
                }
                Err(failure) => {
                    warn!(kind = failure.kind(), error = %failure, "Authentication failed");
                    Err(failure)
                }
            }
        })
    }
}
