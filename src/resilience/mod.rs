//! Resilience middleware: rate limiting, circuit breaking and tracing.
//!
//! Each adapter is a tower layer around an injected collaborator. The
//! collaborators' algorithms live elsewhere; only their position in the chain
//! is decided here (see [`crate::pipeline`]).

mod breaker;
mod rate_limit;
mod trace;

pub use breaker::{CircuitBreaker, CircuitBreakerLayer, CircuitBreakerService};
pub use rate_limit::{RateLimitLayer, RateLimitService, RateLimiter};
pub use trace::{TraceLayer, TraceService};
