//! Failure taxonomy for the request pipeline.
//!
//! Every stage of a composed endpoint fails with [`Failure`]. Authentication
//! failures keep their kind so transports can pick a status code per kind.
//! Internal details are logged but never exposed to clients.

use jsonwebtoken::Algorithm;
use thiserror::Error;
use tonic::Status;
use tracing::error;

/// Authentication failures raised by the token parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("unexpected signing method: {0:?}")]
    UnexpectedSigningMethod(Algorithm),
    #[error("key resolution failed: {0}")]
    KeyResolution(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Failure of a single call through a composed endpoint.
#[derive(Debug, Error)]
pub enum Failure {
    #[error("token signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("call cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("transport: {0}")]
    Transport(#[from] Status),

    #[error("internal: {0}")]
    Internal(String),
}

impl Failure {
    /// Authentication kind, if this is an authentication failure.
    #[must_use]
    pub const fn auth_kind(&self) -> Option<&AuthError> {
        match self {
            Self::Auth(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether a circuit breaker should record this failure against the remote.
    ///
    /// Only failures observed on the way to or from the remote dependency count.
    /// Local rejections (limiter, open breaker, signing, auth) and caller
    /// cancellation never reached the remote and are not reported.
    #[must_use]
    pub fn counts_toward_breaker(&self) -> bool {
        match self {
            Self::Transport(status) => !matches!(
                status.code(),
                tonic::Code::InvalidArgument
                    | tonic::Code::NotFound
                    | tonic::Code::AlreadyExists
                    | tonic::Code::PermissionDenied
                    | tonic::Code::Unauthenticated
                    | tonic::Code::FailedPrecondition
                    | tonic::Code::Cancelled
            ),
            Self::DeadlineExceeded => true,
            Self::Signing(_)
            | Self::Auth(_)
            | Self::Cancelled
            | Self::RateLimited
            | Self::CircuitOpen
            | Self::Internal(_) => false,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Signing(_) => "signing",
            Self::Auth(AuthError::MissingToken) => "missing_token",
            Self::Auth(AuthError::MalformedToken(_)) => "malformed_token",
            Self::Auth(AuthError::UnexpectedSigningMethod(_)) => "unexpected_method",
            Self::Auth(AuthError::KeyResolution(_)) => "key_resolution",
            Self::Auth(AuthError::InvalidToken(_)) => "invalid_token",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::Transport(_) => "transport",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<Failure> for Status {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Auth(AuthError::MalformedToken(_)) => {
                Status::invalid_argument("Malformed bearer token")
            }
            Failure::Auth(err) => Status::unauthenticated(err.to_string()),
            Failure::Signing(ref msg) => {
                error!(error = %msg, "Token signing failed");
                Status::internal("Internal server error")
            }
            Failure::Cancelled => Status::cancelled("Call cancelled"),
            Failure::DeadlineExceeded => Status::deadline_exceeded("Deadline exceeded"),
            Failure::RateLimited => Status::resource_exhausted("Rate limit exceeded"),
            Failure::CircuitOpen => Status::unavailable("Circuit breaker open"),
            Failure::Transport(status) => status,
            Failure::Internal(ref msg) => {
                error!(error = %msg, "Internal error");
                Status::internal("Internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_map_to_distinct_codes() {
        assert_eq!(
            Status::from(Failure::from(AuthError::MissingToken)).code(),
            tonic::Code::Unauthenticated
        );
        assert_eq!(
            Status::from(Failure::from(AuthError::MalformedToken("x".into()))).code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            Status::from(Failure::from(AuthError::UnexpectedSigningMethod(
                Algorithm::RS256
            )))
            .code(),
            tonic::Code::Unauthenticated
        );
    }

    #[test]
    fn internal_details_are_sanitized() {
        let status = Status::from(Failure::Signing("bad pem at line 3".into()));
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(!status.message().contains("pem"));
    }

    #[test]
    fn resilience_failures_map_correctly() {
        assert_eq!(
            Status::from(Failure::RateLimited).code(),
            tonic::Code::ResourceExhausted
        );
        assert_eq!(
            Status::from(Failure::CircuitOpen).code(),
            tonic::Code::Unavailable
        );
        assert_eq!(
            Status::from(Failure::DeadlineExceeded).code(),
            tonic::Code::DeadlineExceeded
        );
    }

    #[test]
    fn only_remote_failures_count_toward_breaker() {
        assert!(Failure::Transport(Status::unavailable("down")).counts_toward_breaker());
        assert!(Failure::DeadlineExceeded.counts_toward_breaker());
        assert!(!Failure::Transport(Status::invalid_argument("bad")).counts_toward_breaker());
        assert!(!Failure::RateLimited.counts_toward_breaker());
        assert!(!Failure::Signing("bad key".into()).counts_toward_breaker());
        assert!(!Failure::from(AuthError::MissingToken).counts_toward_breaker());
    }
}
