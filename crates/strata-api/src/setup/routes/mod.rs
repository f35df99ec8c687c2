//! Route configuration and setup.
//!
//! Health checks live in [health](health).

mod health;

use crate::api_doc::{openapi_json, OPENAPI_JSON_PATH};
use crate::constants::{API_PREFIX, MAX_JSON_BODY_BYTES};
use crate::handlers;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    handler::Handler,
    http::{HeaderValue, Method, Request},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use strata_core::Config;
use strata_infra::{get_request_id, request_id_middleware};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Setup all application routes
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config)?;

    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        let request_id = get_request_id(request).unwrap_or_default();
        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    });

    let app = storage_routes()
        .merge(transfer_routes())
        .route(&format!("{}/health", API_PREFIX), get(health::health_check))
        .route(OPENAPI_JSON_PATH, get(openapi_json))
        .merge(utoipa_rapidoc::RapiDoc::new(OPENAPI_JSON_PATH).path("/docs"))
        .layer(cors)
        .layer(trace_layer)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state);

    Ok(app)
}

/// Browsing, upload, download and delete. Uploads stream their body, so the
/// default body limit is lifted for them; the storage size limit applies
/// while writing.
fn storage_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("{}/locations", API_PREFIX),
            get(handlers::locations::list_locations),
        )
        .route(
            &format!("{}/locations/{{location_id}}", API_PREFIX),
            get(handlers::locations::get_location),
        )
        .route(
            &format!("{}/files/{{location_id}}", API_PREFIX),
            get(handlers::files::list_root),
        )
        .route(
            &format!("{}/files/{{location_id}}/{{*path}}", API_PREFIX),
            get(handlers::files::list_files)
                .post(handlers::upload::upload_file.layer(DefaultBodyLimit::disable()))
                .delete(handlers::files::delete_entry),
        )
        .route(
            &format!("{}/download/{{location_id}}/{{*path}}", API_PREFIX),
            get(handlers::download::download_file),
        )
        .route(
            &format!("{}/directories/{{location_id}}/{{*path}}", API_PREFIX),
            post(handlers::directories::create_directory),
        )
}

fn transfer_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("{}/transfer", API_PREFIX),
            post(handlers::transfer::start_transfer),
        )
        .route(
            &format!("{}/transfer/check-conflicts", API_PREFIX),
            post(handlers::transfer::check_conflicts),
        )
        .route(
            &format!("{}/transfer/progress/{{job_id}}", API_PREFIX),
            get(handlers::transfer::transfer_progress),
        )
        .route(
            &format!("{}/transfer/{{job_id}}", API_PREFIX),
            get(handlers::transfer::get_transfer).delete(handlers::transfer::cancel_transfer),
        )
        .layer(RequestBodyLimitLayer::new(MAX_JSON_BODY_BYTES))
}

fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let cors = if config.cors_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins = config
            .cors_origins
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    };
    Ok(cors)
}
