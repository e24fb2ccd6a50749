use crate::state::AppState;
use crate::{api, logging, signing};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;

/// Builds the router. Layers, innermost first: gzip request decompression,
/// signature check over the wire body, gzip response compression, logging.
pub fn build_http_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/ping", get(api::ping))
        .route("/update/", post(api::update_json))
        .route("/updates/", post(api::update_batch))
        .route("/value/", post(api::value_json))
        .route("/update/{kind}/{id}/{value}", post(api::update_from_path))
        .route("/value/{kind}/{id}", get(api::value_from_path))
        .layer(RequestDecompressionLayer::new())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            signing::verify_and_sign,
        ))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}
