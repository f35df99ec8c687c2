use crate::auth::CurrentUser;
use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use strata_infra::ErrorResponse;
use strata_storage::path::normalize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateDirectoryResponse {
    pub created: bool,
    pub path: String,
}

/// Create a directory and any missing parents
///
/// Creating a directory that already exists succeeds.
#[utoipa::path(
    post,
    path = "/api/v1/directories/{location_id}/{path}",
    tag = "files",
    params(
        ("location_id" = String, Path, description = "Location id"),
        ("path" = String, Path, description = "Directory path relative to the location root")
    ),
    responses(
        (status = 201, description = "Directory created", body = CreateDirectoryResponse),
        (status = 403, description = "Path escapes the location root", body = ErrorResponse),
        (status = 409, description = "A file exists at that path", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(user = %user))]
pub async fn create_directory(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((location_id, path)): Path<(String, String)>,
) -> Result<(StatusCode, Json<CreateDirectoryResponse>), HttpAppError> {
    let adapter = state.registry.adapter(&location_id)?;
    let path = normalize(&path)?;
    adapter.mkdir_all(&path).await?;

    tracing::info!(user = %user, location_id = %location_id, path = %path, "Created directory");

    Ok((
        StatusCode::CREATED,
        Json(CreateDirectoryResponse {
            created: true,
            path,
        }),
    ))
}
