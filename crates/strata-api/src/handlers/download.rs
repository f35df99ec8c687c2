use crate::auth::CurrentUser;
use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::sync::Arc;
use strata_core::AppError;
use strata_infra::ErrorResponse;

/// Download a file
#[utoipa::path(
    get,
    path = "/api/v1/download/{location_id}/{path}",
    tag = "files",
    params(
        ("location_id" = String, Path, description = "Location id"),
        ("path" = String, Path, description = "File path relative to the location root")
    ),
    responses(
        (status = 200, description = "File content", content_type = "application/octet-stream"),
        (status = 400, description = "Path is a directory", body = ErrorResponse),
        (status = 403, description = "Path escapes the location root", body = ErrorResponse),
        (status = 404, description = "File not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(user = %user))]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((location_id, path)): Path<(String, String)>,
) -> Result<Response, HttpAppError> {
    let adapter = state.registry.adapter(&location_id)?;
    let entry = adapter.stat(&path).await?;
    if entry.is_dir() {
        return Err(AppError::BadRequest(format!("{} is a directory", entry.path)).into());
    }

    let stream = adapter.open_read(&entry.path).await?;
    let body_stream = stream.map(|result| {
        result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
    });

    tracing::debug!(path = %entry.path, size = ?entry.size, "Streaming file from storage");

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, content_disposition(&entry.name));
    if let Some(size) = entry.size {
        response = response.header(header::CONTENT_LENGTH, size);
    }

    response
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)).into())
}

/// `attachment` disposition with an ASCII fallback name and the exact UTF-8
/// name in `filename*`.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(name, NON_ALPHANUMERIC)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition("model.bin"),
            "attachment; filename=\"model.bin\"; filename*=UTF-8''model%2Ebin"
        );
    }

    #[test]
    fn test_content_disposition_escapes_quotes_and_unicode() {
        let value = content_disposition("résumé \"v2\".pdf");
        assert!(value.starts_with("attachment; filename=\"r_sum_ _v2_.pdf\";"));
        assert!(value.contains("filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22%2Epdf"));
    }
}
