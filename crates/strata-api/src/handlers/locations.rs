use crate::auth::CurrentUser;
use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use strata_core::models::StorageLocation;
use strata_infra::ErrorResponse;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct LocationsResponse {
    pub locations: Vec<StorageLocation>,
}

/// List configured storage locations
///
/// Local roots come first in configuration order, followed by the buckets
/// visible to the configured credentials. `available` reflects a liveness
/// probe taken for this request.
#[utoipa::path(
    get,
    path = "/api/v1/locations",
    tag = "locations",
    responses(
        (status = 200, description = "Configured locations", body = LocationsResponse)
    )
)]
#[tracing::instrument(skip(state), fields(user = %user))]
pub async fn list_locations(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Json<LocationsResponse> {
    let locations = state.registry.list().await;
    tracing::debug!(count = locations.len(), "Listed storage locations");
    Json(LocationsResponse { locations })
}

#[utoipa::path(
    get,
    path = "/api/v1/locations/{location_id}",
    tag = "locations",
    params(("location_id" = String, Path, description = "Location id (`local-0`, `s3:bucket`)")),
    responses(
        (status = 200, description = "The location", body = StorageLocation),
        (status = 404, description = "Unknown location", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(user = %user))]
pub async fn get_location(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(location_id): Path<String>,
) -> Result<Json<StorageLocation>, HttpAppError> {
    Ok(Json(state.registry.location(&location_id).await?))
}
