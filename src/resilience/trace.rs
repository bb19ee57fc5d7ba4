//! Call tracing and metrics.
//!
//! Each call runs inside a `tracing` span named after the endpoint and is
//! recorded with the `metrics` crate (rendered by the Prometheus exporter).
//!
//! # Metrics Emitted
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `rpc_calls_total` | Counter | `endpoint`, `outcome` |
//! | `rpc_call_duration_seconds` | Histogram | `endpoint`, `outcome` |
//!
//! `outcome` is `ok` or the failure kind (e.g. `rate_limited`,
//! `circuit_open`, `invalid_token`). Both label sets are bounded.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{Instrument, debug, info_span, warn};

use crate::endpoint::Call;
use crate::error::Failure;

/// Tower layer recording one span and one metric sample per call.
#[derive(Clone)]
pub struct TraceLayer {
    name: Arc<str>,
}

impl TraceLayer {
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: Arc::from(name.into().as_ref()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            name: Arc::clone(&self.name),
        }
    }
}

/// Tracing middleware service.
#[derive(Clone)]
pub struct TraceService<S> {
    inner: S,
    name: Arc<str>,
}

impl<S, Req> Service<Call<Req>> for TraceService<S>
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
        let name = Arc::clone(&self.name);
        let span = info_span!("rpc", endpoint = %name, outcome = tracing::field::Empty);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = inner.call(call).await;
                let duration = start.elapsed().as_secs_f64();

                let outcome = match &result {
                    Ok(_) => {
                        debug!(duration_s = duration, "Call completed");
                        "ok"
                    }
                    Err(failure) => {
                        warn!(kind = failure.kind(), error = %failure, duration_s = duration, "Call failed");
                        failure.kind()
                    }
                };
                tracing::Span::current().record("outcome", outcome);

                let labels = [("endpoint", name.to_string()), ("outcome", outcome.to_string())];
                metrics::counter!("rpc_calls_total", &labels).increment(1);
                metrics::histogram!("rpc_call_duration_seconds", &labels).record(duration);

                result
            }
            .instrument(span),
        )
    }
}
