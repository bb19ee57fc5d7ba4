//! Endpoint and middleware composition.
//!
//! An [`Endpoint`] is the uniform call contract every stage satisfies:
//! `(CallContext, Request) -> Result<Response, Failure>`. It is a type-erased
//! tower service, so any tower service with that shape can become an endpoint
//! and any tower layer producing one is a [`Middleware`].
//!
//! # Middleware Order
//! Given `[m1, m2, ..., mn]`, the composed endpoint is `m1(m2(...mn(base)))`:
//! - Request flows: m1 → m2 → ... → mn → base
//! - Response flows: base → mn → ... → m2 → m1
//!
//! The first middleware sees the call before any other and the result after
//! all others have returned. Order is chosen by the caller and is never
//! rearranged here.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::util::{BoxCloneSyncService, Oneshot};
use tower::{Layer, Service, ServiceExt, service_fn};
use tracing::debug;

use crate::context::CallContext;
use crate::error::Failure;

/// One invocation: the call's context plus the request.
#[derive(Debug)]
pub struct Call<Req> {
    pub context: CallContext,
    pub request: Req,
}

impl<Req> Call<Req> {
    pub const fn new(context: CallContext, request: Req) -> Self {
        Self { context, request }
    }

    /// Replace the context with one derived from it.
    #[must_use]
    pub fn map_context(self, f: impl FnOnce(CallContext) -> CallContext) -> Self {
        Self {
            context: f(self.context),
            request: self.request,
        }
    }

    pub fn into_parts(self) -> (CallContext, Req) {
        (self.context, self.request)
    }
}

/// Type-erased, cloneable call contract.
///
/// The same endpoint may be invoked concurrently; each invocation works on its
/// own clone of the underlying service.
pub struct Endpoint<Req, Res> {
    inner: BoxCloneSyncService<Call<Req>, Res, Failure>,
}

impl<Req, Res> Clone for Endpoint<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Req, Res> Endpoint<Req, Res>
where
    Req: Send + 'static,
    Res: 'static,
{
    /// Wrap any tower service satisfying the call contract.
    pub fn new<S>(service: S) -> Self
    where
        S: Service<Call<Req>, Response = Res, Error = Failure> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        Self {
            inner: BoxCloneSyncService::new(service),
        }
    }

    /// Lift an async function of `(CallContext, Request)` into an endpoint.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Failure>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(service_fn(move |call: Call<Req>| {
            let (ctx, request) = call.into_parts();
            f(ctx, request)
        }))
    }

    /// Invoke the endpoint once.
    pub fn invoke(
        &self,
        ctx: CallContext,
        request: Req,
    ) -> Oneshot<BoxCloneSyncService<Call<Req>, Res, Failure>, Call<Req>> {
        self.inner.clone().oneshot(Call::new(ctx, request))
    }
}

impl<Req, Res> Service<Call<Req>> for Endpoint<Req, Res> {
    type Response = Res;
    type Error = Failure;
    type Future = <BoxCloneSyncService<Call<Req>, Res, Failure> as Service<Call<Req>>>::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        self.inner.call(call)
    }
}

/// Transformation `Endpoint -> Endpoint` adding one cross-cutting concern.
///
/// Implemented for every tower [`Layer`] whose service satisfies the call
/// contract, including closures wrapped with [`tower::layer::layer_fn`].
/// A middleware may invoke the next stage zero times (short-circuit), once,
/// or several times (retry).
pub trait Middleware<Req, Res>: Send + Sync {
    fn wrap(&self, next: Endpoint<Req, Res>) -> Endpoint<Req, Res>;
}

impl<L, Req, Res> Middleware<Req, Res> for L
where
    L: Layer<Endpoint<Req, Res>> + Send + Sync,
    L::Service: Service<Call<Req>, Response = Res, Error = Failure> + Clone + Send + Sync + 'static,
    <L::Service as Service<Call<Req>>>::Future: Send + 'static,
    Req: Send + 'static,
    Res: 'static,
{
    fn wrap(&self, next: Endpoint<Req, Res>) -> Endpoint<Req, Res> {
        Endpoint::new(self.layer(next))
    }
}

/// Compose `middlewares` around `base`; the first element is outermost.
pub fn compose<Req, Res>(
    base: Endpoint<Req, Res>,
    middlewares: &[Arc<dyn Middleware<Req, Res>>],
) -> Endpoint<Req, Res> {
    middlewares
        .iter()
        .rev()
        .fold(base, |next, middleware| middleware.wrap(next))
}

struct Stage<Req, Res> {
    name: Cow<'static, str>,
    middleware: Arc<dyn Middleware<Req, Res>>,
}

impl<Req, Res> Clone for Stage<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            middleware: Arc::clone(&self.middleware),
        }
    }
}

/// Ordered middleware chain builder.
///
/// Stages run in the order they are added: the first `named` call is the
/// outermost wrapper.
pub struct Chain<Req, Res> {
    stages: Vec<Stage<Req, Res>>,
}

impl<Req, Res> Default for Chain<Req, Res> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<Req, Res> Clone for Chain<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
        }
    }
}

impl<Req, Res> Chain<Req, Res> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage with an explicit name (used in logs).
    #[must_use]
    pub fn named<M>(mut self, name: impl Into<Cow<'static, str>>, middleware: M) -> Self
    where
        M: Middleware<Req, Res> + 'static,
    {
        self.stages.push(Stage {
            name: name.into(),
            middleware: Arc::new(middleware),
        });
        self
    }

    /// Stage names, outermost first.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|stage| stage.name.as_ref())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wrap `base` with every stage.
    pub fn service(&self, base: Endpoint<Req, Res>) -> Endpoint<Req, Res> {
        let middlewares: Vec<_> = self
            .stages
            .iter()
            .map(|stage| Arc::clone(&stage.middleware))
            .collect();
        debug!(
            stages = ?self.stage_names().collect::<Vec<_>>(),
            "Composed endpoint"
        );
        compose(base, &middlewares)
    }
}
