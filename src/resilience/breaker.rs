//! Circuit breaker adapter.
//!
//! The breaker's state machine is an external collaborator reached through
//! [`CircuitBreaker`]. The adapter asks it for admission before each call and
//! reports the outcome afterwards.
//!
//! Only failures where [`Failure::counts_toward_breaker`] is true are
//! reported. In the canonical client order the rate limiter sits outside the
//! breaker, so limiter rejections never reach it; local failures raised
//! inside (signing, caller cancellation) are not reported either.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::endpoint::Call;
use crate::error::Failure;

/// Breaker state machine. Implementations synchronize internally.
#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    /// Whether a call may be attempted now.
    async fn can_execute(&self) -> bool;

    async fn on_success(&self);

    async fn on_failure(&self);
}

/// Tower layer guarding the next stage with a circuit breaker.
#[derive(Clone)]
pub struct CircuitBreakerLayer {
    breaker: Arc<dyn CircuitBreaker>,
}

impl CircuitBreakerLayer {
    #[must_use]
    pub fn new(breaker: Arc<dyn CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: Arc::clone(&self.breaker),
        }
    }
}

/// Circuit breaker middleware service.
#[derive(Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: Arc<dyn CircuitBreaker>,
}

impl<S, Req> Service<Call<Req>> for CircuitBreakerService<S>
where
    S: Service<Call<Req>, Error = Failure> + Clone + Send + 'static,
    S::Future: Send,
    S::Response: Send,
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
        let breaker = Arc::clone(&self.breaker);

        Box::pin(async move {
            if !breaker.can_execute().await {
                warn!("Circuit breaker open, rejecting call");
                return Err(Failure::CircuitOpen);
            }

            let result = inner.call(call).await;
            let report = match &result {
                Ok(_) => Some(true),
                Err(failure) if failure.counts_toward_breaker() => {
                    debug!(kind = failure.kind(), "Reporting failure to circuit breaker");
                    Some(false)
                }
                Err(_) => None,
            };
            match report {
                Some(true) => breaker.on_success().await,
                Some(false) => breaker.on_failure().await,
                None => {}
            }
            result
        })
    }
}
