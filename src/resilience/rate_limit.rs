//! Rate limiting adapter.
//!
//! The limiting algorithm lives behind [`RateLimiter`]; this module only
//! decides where in the chain a rejection happens. One limiter is usually
//! shared by every endpoint that talks to the same remote.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use governor::DefaultDirectRateLimiter;
use tower::{Layer, Service};
use tracing::warn;

use crate::endpoint::Call;
use crate::error::Failure;

/// Admission decision for one call. Implementations synchronize internally.
pub trait RateLimiter: Send + Sync {
    /// Take one permit, or return `false` if the call must be rejected now.
    fn try_acquire(&self) -> bool;
}

impl RateLimiter for DefaultDirectRateLimiter {
    fn try_acquire(&self) -> bool {
        self.check().is_ok()
    }
}

/// Tower layer rejecting calls the limiter does not admit.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitLayer {
    #[must_use]
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

/// Rate limiting middleware service.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<dyn RateLimiter>,
}

impl<S, Req> Service<Call<Req>> for RateLimitService<S>
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
        if !self.limiter.try_acquire() {
            warn!("Rate limit exceeded");
            return Box::pin(async { Err(Failure::RateLimited) });
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(call).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallContext;
    use crate::endpoint::Endpoint;
    use governor::Quota;
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Permits(AtomicUsize);

    impl RateLimiter for Permits {
        fn try_acquire(&self) -> bool {
            self.0
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    fn ok() -> Endpoint<(), ()> {
        Endpoint::from_fn(|_ctx: CallContext, ()| async { Ok(()) })
    }

    #[tokio::test]
    async fn rejects_once_permits_run_out() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(Permits(AtomicUsize::new(2)));
        let endpoint = Endpoint::new(RateLimitLayer::new(limiter).layer(ok()));

        assert!(endpoint.invoke(CallContext::new(), ()).await.is_ok());
        assert!(endpoint.invoke(CallContext::new(), ()).await.is_ok());
        assert!(matches!(
            endpoint.invoke(CallContext::new(), ()).await,
            Err(Failure::RateLimited)
        ));
    }

    #[tokio::test]
    async fn limiter_is_shared_across_endpoints() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(Permits(AtomicUsize::new(1)));
        let layer = RateLimitLayer::new(limiter);
        let sum = Endpoint::new(layer.layer(ok()));
        let concat = Endpoint::new(layer.layer(ok()));

        assert!(sum.invoke(CallContext::new(), ()).await.is_ok());
        assert!(concat.invoke(CallContext::new(), ()).await.is_err());
    }

    #[test]
    fn governor_limiter_enforces_burst() {
        let limiter = governor::RateLimiter::direct(Quota::per_hour(NonZeroU32::MIN));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
