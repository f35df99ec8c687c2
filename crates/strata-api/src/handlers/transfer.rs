use crate::auth::CurrentUser;
use crate::constants::API_PREFIX;
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::models::{TransferEndpoint, TransferEvent, TransferJob, TransferRequest};
use strata_infra::ErrorResponse;
use strata_transfer::TransferError;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckConflictsRequest {
    pub destination: TransferEndpoint,
    /// Names relative to the destination path
    pub files: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckConflictsResponse {
    pub conflicts: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartTransferResponse {
    pub job_id: Uuid,
    /// Server-sent events endpoint for this job's progress
    pub sse_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelTransferResponse {
    pub cancelled: bool,
}

/// Report which of the given files already exist at the destination
#[utoipa::path(
    post,
    path = "/api/v1/transfer/check-conflicts",
    tag = "transfer",
    request_body = CheckConflictsRequest,
    responses(
        (status = 200, description = "Existing destination entries, in request order", body = CheckConflictsResponse),
        (status = 403, description = "A path escapes the location root", body = ErrorResponse),
        (status = 404, description = "Unknown location", body = ErrorResponse)
    )
)]
#[tracing::instrument(
    skip(state, request),
    fields(
        user = %user,
        location_id = %request.destination.location_id,
        files = request.files.len()
    )
)]
pub async fn check_conflicts(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ValidatedJson(request): ValidatedJson<CheckConflictsRequest>,
) -> Result<Json<CheckConflictsResponse>, HttpAppError> {
    let adapter = state.registry.adapter(&request.destination.location_id)?;
    let conflicts = state
        .conflicts
        .check(&*adapter, &request.destination.path, &request.files)
        .await?;
    Ok(Json(CheckConflictsResponse { conflicts }))
}

/// Start a transfer job
///
/// Directory entries are expanded into the files they contain. Progress is
/// available at the returned `sseUrl`.
#[utoipa::path(
    post,
    path = "/api/v1/transfer",
    tag = "transfer",
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Job queued", body = StartTransferResponse),
        (status = 400, description = "Empty or malformed request", body = ErrorResponse),
        (status = 403, description = "A path escapes the location root", body = ErrorResponse),
        (status = 404, description = "Unknown location", body = ErrorResponse)
    )
)]
#[tracing::instrument(
    skip(state, request),
    fields(
        user = %user,
        source = %request.source.location_id,
        destination = %request.destination.location_id,
        files = request.files.len()
    )
)]
pub async fn start_transfer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ValidatedJson(request): ValidatedJson<TransferRequest>,
) -> Result<Json<StartTransferResponse>, HttpAppError> {
    let src = state.registry.adapter(&request.source.location_id)?;
    let dst = state.registry.adapter(&request.destination.location_id)?;
    let job_id = state.queue.enqueue(&request, src, dst).await?;

    tracing::info!(user = %user, job_id = %job_id, "Transfer started");

    Ok(Json(StartTransferResponse {
        job_id,
        sse_url: format!("{}/transfer/progress/{}", API_PREFIX, job_id),
    }))
}

/// Stream a job's progress as server-sent events
///
/// Emits one `progress` event per file status change and a final `complete`
/// event carrying the job status, then closes. Only one subscriber per job is
/// accepted; disconnecting does not cancel the job.
#[utoipa::path(
    get,
    path = "/api/v1/transfer/progress/{job_id}",
    tag = "transfer",
    params(("job_id" = Uuid, Path, description = "Transfer job id")),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 404, description = "Unknown job", body = ErrorResponse),
        (status = 409, description = "Job already has a subscriber", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(user = %user))]
pub async fn transfer_progress(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, HttpAppError> {
    let events = state.queue.subscribe(job_id)?;
    Ok(Sse::new(events.map(sse_event)).keep_alive(KeepAlive::default()))
}

fn sse_event(event: TransferEvent) -> Result<Event, axum::Error> {
    match &event {
        TransferEvent::Progress(progress) => Event::default().event("progress").json_data(progress),
        TransferEvent::Finished { .. } => Event::default().event("complete").json_data(&event),
    }
}

/// Get a job snapshot
#[utoipa::path(
    get,
    path = "/api/v1/transfer/{job_id}",
    tag = "transfer",
    params(("job_id" = Uuid, Path, description = "Transfer job id")),
    responses(
        (status = 200, description = "Job state", body = TransferJob),
        (status = 404, description = "Unknown or evicted job", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(user = %user))]
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<TransferJob>, HttpAppError> {
    state
        .queue
        .get(job_id)
        .map(Json)
        .ok_or_else(|| TransferError::JobNotFound(job_id).into())
}

/// Cancel a job, or acknowledge a finished one
///
/// For a running job, files not yet started are cancelled and the one in
/// flight stops within one chunk. For a finished job nothing is cancelled and
/// the job is evicted.
#[utoipa::path(
    delete,
    path = "/api/v1/transfer/{job_id}",
    tag = "transfer",
    params(("job_id" = Uuid, Path, description = "Transfer job id")),
    responses(
        (status = 200, description = "Whether the job was cancelled", body = CancelTransferResponse),
        (status = 404, description = "Unknown job", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(user = %user))]
pub async fn cancel_transfer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelTransferResponse>, HttpAppError> {
    let cancelled = state.queue.cancel(job_id)?;
    if cancelled {
        tracing::info!(user = %user, job_id = %job_id, "Transfer cancelled");
    } else {
        state.queue.acknowledge(job_id)?;
    }
    Ok(Json(CancelTransferResponse { cancelled }))
}

