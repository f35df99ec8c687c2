//! OpenAPI documentation, served as JSON and through RapiDoc at `/docs`.

use axum::Json;
use utoipa::OpenApi;

use crate::handlers;
use strata_core::models;
use strata_infra::ErrorResponse;

pub const OPENAPI_JSON_PATH: &str = "/api/openapi.json";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Strata API",
        version = "0.1.0",
        description = "Browse, upload, download and move files across S3-compatible buckets and local volumes. All endpoints are versioned under /api/v1/."
    ),
    paths(
        handlers::locations::list_locations,
        handlers::locations::get_location,
        handlers::files::list_root,
        handlers::files::list_files,
        handlers::files::delete_entry,
        handlers::upload::upload_file,
        handlers::download::download_file,
        handlers::directories::create_directory,
        handlers::transfer::check_conflicts,
        handlers::transfer::start_transfer,
        handlers::transfer::transfer_progress,
        handlers::transfer::get_transfer,
        handlers::transfer::cancel_transfer,
    ),
    components(schemas(
        ErrorResponse,
        models::StorageLocation,
        models::LocationKind,
        models::FileEntry,
        models::FileType,
        models::ConflictPolicy,
        models::TransferEndpoint,
        models::TransferRequest,
        models::TransferJob,
        models::TransferFileJob,
        models::JobStatus,
        models::FileStatus,
        models::ProgressEvent,
        handlers::locations::LocationsResponse,
        handlers::files::FilesResponse,
        handlers::files::DeleteResponse,
        handlers::upload::UploadResponse,
        handlers::directories::CreateDirectoryResponse,
        handlers::transfer::CheckConflictsRequest,
        handlers::transfer::CheckConflictsResponse,
        handlers::transfer::StartTransferResponse,
        handlers::transfer::CancelTransferResponse,
    )),
    tags(
        (name = "locations", description = "Configured storage locations"),
        (name = "files", description = "Browse, upload, download and delete"),
        (name = "transfer", description = "Cross-location transfer jobs and progress")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
