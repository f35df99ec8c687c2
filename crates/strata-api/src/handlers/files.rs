use crate::auth::CurrentUser;
use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use strata_core::models::{FileEntry, Pagination};
use strata_core::AppError;
use strata_infra::ErrorResponse;
use strata_storage::path::normalize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilesResponse {
    pub files: Vec<FileEntry>,
    pub current_path: String,
    /// `null` at the location root
    pub parent_path: Option<String>,
    /// Number of entries in the directory before pagination
    pub total_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub deleted: bool,
    pub item_count: u64,
}

/// List the root of a location
#[utoipa::path(
    get,
    path = "/api/v1/files/{location_id}",
    tag = "files",
    params(
        ("location_id" = String, Path, description = "Location id"),
        Pagination
    ),
    responses(
        (status = 200, description = "Directory listing", body = FilesResponse),
        (status = 404, description = "Unknown location", body = ErrorResponse)
    )
)]
pub async fn list_root(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(location_id): Path<String>,
    page: Result<Query<Pagination>, QueryRejection>,
) -> Result<Json<FilesResponse>, HttpAppError> {
    list_directory(&state, &user, &location_id, "", page).await
}

/// List a directory
#[utoipa::path(
    get,
    path = "/api/v1/files/{location_id}/{path}",
    tag = "files",
    params(
        ("location_id" = String, Path, description = "Location id"),
        ("path" = String, Path, description = "Directory path relative to the location root"),
        Pagination
    ),
    responses(
        (status = 200, description = "Directory listing", body = FilesResponse),
        (status = 403, description = "Path escapes the location root", body = ErrorResponse),
        (status = 404, description = "Directory not found", body = ErrorResponse)
    )
)]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((location_id, path)): Path<(String, String)>,
    page: Result<Query<Pagination>, QueryRejection>,
) -> Result<Json<FilesResponse>, HttpAppError> {
    list_directory(&state, &user, &location_id, &path, page).await
}

#[tracing::instrument(skip(state, page), fields(user = %user))]
async fn list_directory(
    state: &AppState,
    user: &CurrentUser,
    location_id: &str,
    path: &str,
    page: Result<Query<Pagination>, QueryRejection>,
) -> Result<Json<FilesResponse>, HttpAppError> {
    let Query(page) =
        page.map_err(|e| AppError::InvalidInput(format!("Invalid pagination: {}", e.body_text())))?;

    let adapter = state.registry.adapter(location_id)?;
    let current_path = normalize(path)?;
    let listing = adapter.list(&current_path, page).await?;

    Ok(Json(FilesResponse {
        files: listing.files,
        parent_path: parent_path(&current_path),
        current_path,
        total_count: listing.total_count,
    }))
}

/// Delete a file or directory tree
#[utoipa::path(
    delete,
    path = "/api/v1/files/{location_id}/{path}",
    tag = "files",
    params(
        ("location_id" = String, Path, description = "Location id"),
        ("path" = String, Path, description = "Path relative to the location root")
    ),
    responses(
        (status = 200, description = "Deleted", body = DeleteResponse),
        (status = 403, description = "Path escapes the location root", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(user = %user))]
pub async fn delete_entry(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((location_id, path)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, HttpAppError> {
    let adapter = state.registry.adapter(&location_id)?;
    let item_count = adapter.delete(&path).await?;

    tracing::info!(
        user = %user,
        location_id = %location_id,
        path = %path,
        item_count,
        "Deleted storage entry"
    );

    Ok(Json(DeleteResponse {
        deleted: true,
        item_count,
    }))
}

/// Parent of a normalized path; `None` for the root.
fn parent_path(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    Some(
        path.rsplit_once('/')
            .map(|(parent, _)| parent.to_string())
            .unwrap_or_default(),
    )
}
