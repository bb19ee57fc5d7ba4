//! Canonical pipeline assembly.
//!
//! Middleware order is load-bearing, so the order for each side is fixed here
//! instead of being improvised per call site.
//!
//! # Client order (outermost first)
//! tracer → limiter → breaker → signer → base
//!
//! - The tracer is outermost so calls rejected by the limiter or the breaker
//!   are still observed.
//! - The limiter sits outside the breaker: its rejections never reach the
//!   breaker and never count toward its failure statistics.
//! - The signer is nearest the wire so the token exists when the transport
//!   encodes the call.
//!
//! # Server order (outermost first)
//! tracer → parser → base

use std::sync::Arc;

use tracing::info;

use crate::auth::{Parser, ParserLayer, Signer, SignerLayer};
use crate::endpoint::{Chain, Endpoint};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerLayer, RateLimitLayer, RateLimiter, TraceLayer,
};

/// Outbound endpoint assembly. Absent stages are skipped.
pub struct ClientPipeline<Req, Res> {
    name: String,
    base: Endpoint<Req, Res>,
    tracer: bool,
    limiter: Option<Arc<dyn RateLimiter>>,
    breaker: Option<Arc<dyn CircuitBreaker>>,
    signer: Option<Arc<Signer>>,
}

impl<Req, Res> ClientPipeline<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Start a pipeline for the remote method `name` reached through `base`.
    #[must_use]
    pub fn new(name: impl Into<String>, base: Endpoint<Req, Res>) -> Self {
        Self {
            name: name.into(),
            base,
            tracer: false,
            limiter: None,
            breaker: None,
            signer: None,
        }
    }

    /// Trace every call under the pipeline's name.
    #[must_use]
    pub fn tracer(mut self) -> Self {
        self.tracer = true;
        self
    }

    /// Throttle calls with a limiter, typically shared with every endpoint
    /// of the same remote.
    #[must_use]
    pub fn limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    #[must_use]
    pub fn signer(mut self, signer: Signer) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    /// The configured stages in canonical order, without the base.
    #[must_use]
    pub fn chain(&self) -> Chain<Req, Res> {
        let mut chain = Chain::new();
        if self.tracer {
            chain = chain.named("tracer", TraceLayer::new(self.name.clone()));
        }
        if let Some(limiter) = &self.limiter {
            chain = chain.named("limiter", RateLimitLayer::new(Arc::clone(limiter)));
        }
        if let Some(breaker) = &self.breaker {
            chain = chain.named("breaker", CircuitBreakerLayer::new(Arc::clone(breaker)));
        }
        if let Some(signer) = &self.signer {
            chain = chain.named("signer", SignerLayer::from_shared(Arc::clone(signer)));
        }
        chain
    }

    /// Compose the configured stages around the base endpoint.
    #[must_use]
    pub fn build(self) -> Endpoint<Req, Res> {
        let chain = self.chain();
        info!(
            endpoint = %self.name,
            stages = ?chain.stage_names().collect::<Vec<_>>(),
            "Client pipeline assembled"
        );
        chain.service(self.base)
    }
}

/// Inbound endpoint assembly.
pub struct ServerPipeline<Req, Res> {
    name: String,
    base: Endpoint<Req, Res>,
    tracer: bool,
    parser: Option<Parser>,
}

impl<Req, Res> ServerPipeline<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    #[must_use]
    pub fn new(name: impl Into<String>, base: Endpoint<Req, Res>) -> Self {
        Self {
            name: name.into(),
            base,
            tracer: false,
            parser: None,
        }
    }

    #[must_use]
    pub fn tracer(mut self) -> Self {
        self.tracer = true;
        self
    }

    /// Require a verified bearer token on every call.
    #[must_use]
    pub fn parser(mut self, parser: Parser) -> Self {
        self.parser = Some(parser);
        self
    }

    #[must_use]
    pub fn build(self) -> Endpoint<Req, Res> {
        let mut chain = Chain::new();
        if self.tracer {
            chain = chain.named("tracer", TraceLayer::new(self.name.clone()));
        }
        if let Some(parser) = self.parser {
            chain = chain.named("parser", ParserLayer::from_parser(parser));
        }
        info!(
            endpoint = %self.name,
            stages = ?chain.stage_names().collect::<Vec<_>>(),
            "Server pipeline assembled"
        );
        chain.service(self.base)
    }
}
