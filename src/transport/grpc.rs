//! gRPC bridge: moves bearer tokens between tonic metadata and the
//! [`CallContext`], and adapts endpoints to tonic handlers.

use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::auth::BearerToken;
use crate::context::CallContext;
use crate::endpoint::Endpoint;
use crate::error::Failure;

pub const AUTHORIZATION: &str = "authorization";

/// Strip the bearer scheme from an `authorization` header value.
#[must_use]
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .or_else(|| header.strip_prefix("BEARER "))
}

/// Context for an inbound call, carrying its bearer token if one was sent.
///
/// A missing or unreadable header yields a context without a token; the
/// parser then rejects the call with `MissingToken`.
#[must_use]
pub fn context_from_metadata(metadata: &MetadataMap) -> CallContext {
    let ctx = CallContext::new();
    let token = metadata
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .filter(|token| !token.is_empty());

    match token {
        Some(token) => ctx.with_token(BearerToken::from(token)),
        None => {
            debug!("No bearer token in request metadata");
            ctx
        }
    }
}

#[must_use]
pub fn inbound_context<T>(request: &Request<T>) -> CallContext {
    context_from_metadata(request.metadata())
}

/// Write the context's token as `authorization: Bearer <token>`.
///
/// Does nothing when the context carries no token.
///
/// # Errors
/// Returns `Failure::Internal` if the token is not a valid header value.
pub fn attach_token(ctx: &CallContext, metadata: &mut MetadataMap) -> Result<(), Failure> {
    let Some(token) = ctx.token() else {
        return Ok(());
    };
    let value = MetadataValue::try_from(format!("Bearer {}", token.as_str()))
        .map_err(|e| Failure::Internal(format!("invalid authorization header: {e}")))?;
    metadata.insert(AUTHORIZATION, value);
    Ok(())
}

/// Build an outgoing tonic request carrying the context's token and deadline.
///
/// # Errors
/// Returns `Failure::DeadlineExceeded` if the deadline has already passed, or
/// `Failure::Internal` if the token cannot be encoded.
pub fn outbound_request<T>(ctx: &CallContext, message: T) -> Result<Request<T>, Failure> {
    ctx.check()?;
    let mut request = Request::new(message);
    attach_token(ctx, request.metadata_mut())?;
    if let Some(deadline) = ctx.deadline() {
        request.set_timeout(deadline.saturating_duration_since(tokio::time::Instant::now()));
    }
    Ok(request)
}

/// Serve a tonic request with an inbound endpoint.
///
/// # Errors
/// Returns the endpoint's failure mapped to a gRPC status.
pub async fn serve<Req, Res>(
    endpoint: &Endpoint<Req, Res>,
    request: Request<Req>,
) -> Result<Response<Res>, Status>
where
    Req: Send + 'static,
    Res: 'static,
{
    let ctx = inbound_context(&request);
    let response = endpoint.invoke(ctx, request.into_inner()).await?;
    Ok(Response::new(response))
}
