//! Health check handler.

use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub(super) struct LocationHealth {
    pub total: usize,
    pub available: usize,
}

#[derive(Debug, Serialize)]
pub(super) struct HealthCheckResponse {
    /// `healthy` when every location is reachable, `degraded` otherwise
    pub status: &'static str,
    pub locations: LocationHealth,
}

/// Always 200: an unmounted volume degrades the service but does not make the
/// process unhealthy.
pub(super) async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthCheckResponse> {
    let locations = state.registry.list().await;
    let total = locations.len();
    let available = locations.iter().filter(|l| l.available).count();
    let status = if available == total {
        "healthy"
    } else {
        "degraded"
    };
    Json(HealthCheckResponse {
        status,
        locations: LocationHealth { total, available },
    })
}
