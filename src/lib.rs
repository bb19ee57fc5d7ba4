//! Composable request pipeline for RPC endpoints.
//!
//! Cross-cutting concerns (authentication, rate limiting, circuit breaking,
//! tracing) are layered around a business operation as tower middleware over
//! a single call contract:
//!
//! ```text
//! (CallContext, Request) -> Result<Response, Failure>
//! ```
//!
//! Client calls run tracer → limiter → breaker → signer → transport; server
//! calls run transport → tracer → parser → handler. See [`pipeline`].

pub mod auth;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod pipeline;
pub mod resilience;
pub mod transport;

pub use auth::{
    BearerToken, Claims, KeyFunc, MethodFamily, Parser, ParserLayer, Signer, SignerLayer,
};
pub use config::{Config, ConfigError};
pub use context::{CallContext, CancelHandle, Cancellation, cancellation};
pub use endpoint::{Call, Chain, Endpoint, Middleware, compose};
pub use error::{AuthError, Failure};
pub use pipeline::{ClientPipeline, ServerPipeline};
pub use pipeline_telemetry as telemetry;
