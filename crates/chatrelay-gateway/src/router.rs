use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::auth;
use crate::state::SharedState;

/// Build the main application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    let api_routes = Router::new()
        .route("/api/chat", get(api::get_chat).post(api::post_chat))
        .route("/api/status", get(api::status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(api::health))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
