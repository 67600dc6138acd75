use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::api::error_response;
use crate::state::SharedState;

/// Reject `/api/*` requests without the configured bearer token.
/// Does nothing when no `gateway.api_key` is set.
pub async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if tokens_match(token.trim(), expected) => next.run(request).await,
        _ => {
            warn!("rejected unauthenticated request to {}", request.uri().path());
            error_response(StatusCode::UNAUTHORIZED, "unauthorized")
        }
    }
}

fn tokens_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
