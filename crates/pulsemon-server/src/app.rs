use crate::state::AppState;
use crate::{api, logging, middleware};
use axum::Router;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::timeout::TimeoutLayer;

/// Builds the HTTP router.
///
/// From the outside in: CORS, request timeout, gzip response compression,
/// gzip request decompression, request logging, body signatures, handlers.
pub fn build_http_app(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::routes()
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::signature_middleware,
        ))
        .with_state(state)
        .layer(axum::middleware::from_fn(logging::request_logging))
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
}
