use crate::auth::CurrentUser;
use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap},
    Json,
};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use strata_core::AppError;
use strata_infra::ErrorResponse;
use strata_storage::path::normalize;
use strata_storage::{ByteSink, WriteMode};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub uploaded: bool,
    pub path: String,
}

/// Upload a file
///
/// The request body is the raw file content and is streamed to storage. An
/// existing entry at the path is never replaced.
#[utoipa::path(
    post,
    path = "/api/v1/files/{location_id}/{path}",
    tag = "files",
    params(
        ("location_id" = String, Path, description = "Location id"),
        ("path" = String, Path, description = "Destination path relative to the location root")
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 403, description = "Path escapes the location root", body = ErrorResponse),
        (status = 409, description = "An entry already exists at the path", body = ErrorResponse),
        (status = 413, description = "File exceeds the size limit", body = ErrorResponse),
        (status = 507, description = "Destination is out of space", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, headers, body), fields(user = %user))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((location_id, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, HttpAppError> {
    let start = Instant::now();
    let adapter = state.registry.adapter(&location_id)?;
    let path = normalize(&path)?;

    // Fast path; the create-new write below still refuses an entry that
    // appears while the body streams.
    if adapter.exists(&path).await? {
        return Err(AppError::Conflict(format!("{} already exists", path)).into());
    }

    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut sink = adapter
        .open_write(&path, content_length, WriteMode::CreateNew)
        .await?;
    let streamed = stream_body(body, sink.as_mut()).await;
    let bytes = match streamed {
        Ok(()) => sink.finish().await?,
        Err(e) => {
            if let Err(abort_err) = sink.abort().await {
                tracing::warn!(error = %abort_err, path = %path, "Failed to discard partial upload");
            }
            return Err(e);
        }
    };

    tracing::info!(
        user = %user,
        location_id = %location_id,
        path = %path,
        bytes,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "File uploaded"
    );

    Ok(Json(UploadResponse {
        uploaded: true,
        path,
    }))
}

async fn stream_body(body: Body, sink: &mut dyn ByteSink) -> Result<(), HttpAppError> {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| AppError::BadRequest(format!("Failed to read request body: {}", e)))?;
        if chunk.is_empty() {
            continue;
        }
        sink.write(chunk).await?;
    }
    Ok(())
}
