use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use storm_tape_domain::LogicalPath;
use storm_tape_kernel::ApiError;
use storm_tape_stage::{ArchiveInfoEntry, StageView};
use utoipa::ToSchema;

use crate::AppState;

/// `axum::Json` with its rejection mapped to the service's own
/// `ValidationError` family (§7) instead of axum's default plain-text body,
/// so malformed request bodies surface as `application/problem+json` with
/// the title `"Invalid JSON"`.
pub(crate) struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(_rejection) => Err(ApiError::validation("Invalid JSON")),
        }
    }
}

/// OpenAPI-facing mirror of [`StatusFile`](storm_tape_stage::StatusFile).
///
/// `storm-tape-stage` has no `utoipa` dependency of its own, so the schema
/// for its response bodies is declared here at the HTTP boundary instead;
/// the `value_type` overrides just tell `utoipa` what the field serializes
/// as, they don't change the actual JSON produced by `Serialize`.
#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct StatusFileDto {
    #[schema(value_type = String)]
    path: LogicalPath,
    #[schema(value_type = String)]
    state: storm_tape_domain::FileState,
}

/// OpenAPI-facing mirror of [`StageView`](storm_tape_stage::StageView), for
/// `status`/`cancel`/`release` responses.
///
/// Keyed `id`, not `requestId`: only the 201 `stage` create body
/// ([`StageCreatedBody`]) uses `requestId` — a status poll that echoed the
/// same key back would leave a client reading `id` with nothing.
#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct StageStatusDto {
    id: String,
    #[serde(rename = "createdAt")]
    created_at: i64,
    #[serde(rename = "startedAt")]
    started_at: i64,
    #[serde(rename = "completedAt")]
    completed_at: i64,
    files: Vec<StatusFileDto>,
}

impl From<StageView> for StageStatusDto {
    fn from(view: StageView) -> Self {
        Self {
            id: view.id,
            created_at: view.created_at,
            started_at: view.started_at,
            completed_at: view.completed_at,
            files: view
                .files
                .into_iter()
                .map(|f| StatusFileDto { path: f.path, state: f.state })
                .collect(),
        }
    }
}

/// OpenAPI-facing mirror of [`ArchiveInfoEntry`](storm_tape_stage::ArchiveInfoEntry).
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub(crate) enum ArchiveInfoEntryDto {
    Locality {
        #[schema(value_type = String)]
        path: LogicalPath,
        #[schema(value_type = String)]
        locality: storm_tape_domain::Locality,
    },
    Error {
        #[schema(value_type = String)]
        path: LogicalPath,
        error: String,
    },
}

impl From<ArchiveInfoEntry> for ArchiveInfoEntryDto {
    fn from(entry: ArchiveInfoEntry) -> Self {
        match entry {
            ArchiveInfoEntry::Locality { path, locality } => Self::Locality { path, locality },
            ArchiveInfoEntry::Error { path, error } => Self::Error { path, error },
        }
    }
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct FileEntry {
    path: LogicalPath,
}

#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct StageRequestBody {
    files: Vec<FileEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct StageCreatedBody {
    #[serde(rename = "requestId")]
    request_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct PathsBody {
    paths: Vec<LogicalPath>,
}

/// Submits a fresh stage request for the given logical paths.
#[utoipa::path(
    post,
    path = "/api/v1/stage",
    request_body = StageRequestBody,
    responses((status = 201, description = "Stage request created", body = StageCreatedBody)),
)]
pub(crate) async fn stage(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<StageRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.files.is_empty() {
        return Err(ApiError::validation("Invalid number of files"));
    }
    let paths: Vec<LogicalPath> = body.files.into_iter().map(|f| f.path).collect();

    let view = tokio::task::spawn_blocking(move || state.api.stage(paths, now()))
        .await
        .map_err(|_| ApiError::internal("stage task panicked"))??;

    let location = format!("/api/v1/stage/{}", view.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(StageCreatedBody { request_id: view.id }),
    ))
}

/// Runs a Lifecycle Engine pass over a stage and reports its current state.
#[utoipa::path(
    get,
    path = "/api/v1/stage/{id}",
    params(("id" = String, Path, description = "Stage request id")),
    responses((status = 200, description = "Stage status", body = StageStatusDto)),
)]
pub(crate) async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = tokio::task::spawn_blocking(move || state.api.status(&id, now()))
        .await
        .map_err(|_| ApiError::internal("status task panicked"))??;
    Ok(Json(StageStatusDto::from(view)))
}

/// Drives the listed files of a stage to `cancelled`.
#[utoipa::path(
    post,
    path = "/api/v1/stage/{id}/cancel",
    params(("id" = String, Path, description = "Stage request id")),
    request_body = PathsBody,
    responses((status = 200, description = "Files cancelled", body = StageStatusDto), (status = 400, description = "Some paths do not belong to this stage")),
)]
pub(crate) async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<PathsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let view = tokio::task::spawn_blocking(move || state.api.cancel(&id, &body.paths, now()))
        .await
        .map_err(|_| ApiError::internal("cancel task panicked"))??;
    Ok(Json(StageStatusDto::from(view)))
}

/// Semantic alias of [`cancel`].
#[utoipa::path(
    post,
    path = "/api/v1/release/{id}",
    params(("id" = String, Path, description = "Stage request id")),
    request_body = PathsBody,
    responses((status = 200, description = "Files released", body = StageStatusDto), (status = 400, description = "Some paths do not belong to this stage")),
)]
pub(crate) async fn release(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<PathsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let view = tokio::task::spawn_blocking(move || state.api.release(&id, &body.paths, now()))
        .await
        .map_err(|_| ApiError::internal("release task panicked"))??;
    Ok(Json(StageStatusDto::from(view)))
}

/// Erases a stage and its file rows.
#[utoipa::path(
    delete,
    path = "/api/v1/stage/{id}",
    params(("id" = String, Path, description = "Stage request id")),
    responses((status = 200, description = "Stage deleted"), (status = 404, description = "Unknown stage id")),
)]
pub(crate) async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tokio::task::spawn_blocking(move || state.api.delete(&id))
        .await
        .map_err(|_| ApiError::internal("delete task panicked"))??;
    Ok(StatusCode::OK)
}

/// Resolves and stats the given logical paths, independent of any stage.
#[utoipa::path(
    post,
    path = "/api/v1/archiveinfo",
    request_body = PathsBody,
    responses((status = 200, description = "Archive info", body = [ArchiveInfoEntryDto])),
)]
pub(crate) async fn archive_info(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<PathsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = tokio::task::spawn_blocking(move || state.api.archive_info(body.paths))
        .await
        .map_err(|_| ApiError::internal("archive_info task panicked"))?;
    let entries: Vec<ArchiveInfoEntryDto> = entries.into_iter().map(ArchiveInfoEntryDto::from).collect();
    Ok(Json(entries))
}

/// Number of file rows currently eligible for take-over, as plain text.
#[utoipa::path(
    get,
    path = "/api/v1/recalltable/ready-take-over",
    responses((status = 200, description = "Count ready for take-over", body = String)),
)]
pub(crate) async fn ready_take_over(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let count = tokio::task::spawn_blocking(move || state.recall.ready_take_over())
        .await
        .map_err(|_| ApiError::internal("ready-take-over task panicked"))??;
    Ok(count.to_string())
}

#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct TakeOverForm {
    first: i64,
}

const MAX_TAKE_OVER_BATCH: i64 = 1_000_000;

/// Reserves up to `first` eligible files for take-over, one physical path
/// per line of plain text.
///
/// The `first` field is parsed from the raw form body instead of through a
/// typed [`axum::extract::Form`] so that a missing field and a malformed
/// value can be told apart and given the two distinct messages the original
/// service used (`"Invalid body content"` vs `"Invalid number of files"`).
#[utoipa::path(
    post,
    path = "/api/v1/recalltable/take-over",
    request_body(content = TakeOverForm, content_type = "application/x-www-form-urlencoded"),
    responses((status = 200, description = "Physical paths reserved", body = String), (status = 400, description = "Invalid number of files"), (status = 400, description = "Invalid body content")),
)]
pub(crate) async fn take_over(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse, ApiError> {
    let first = url::form_urlencoded::parse(&body)
        .find(|(key, _)| key == "first")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| ApiError::validation("Invalid body content"))?;

    let n = first
        .parse::<i64>()
        .ok()
        .filter(|first| (1..=MAX_TAKE_OVER_BATCH).contains(first))
        .ok_or_else(|| ApiError::validation("Invalid number of files"))? as usize;

    let paths = tokio::task::spawn_blocking(move || state.recall.take_over(n))
        .await
        .map_err(|_| ApiError::internal("take-over task panicked"))??;

    Ok(join_paths(&paths))
}

#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct InProgressQuery {
    n: i64,
    #[serde(default)]
    precise: bool,
}

/// Up to `n` physical paths currently believed to be in progress, one per
/// line of plain text.
#[utoipa::path(
    get,
    path = "/api/v1/recalltable/in-progress",
    params(("n" = i64, Query, description = "Maximum number of paths to report"), ("precise" = Option<bool>, Query, description = "Re-check each path against the filesystem")),
    responses((status = 200, description = "Physical paths in progress", body = String), (status = 400, description = "Invalid query parameters")),
)]
pub(crate) async fn in_progress(
    State(state): State<AppState>,
    Query(query): Query<InProgressQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if query.n <= 0 {
        return Err(ApiError::validation("Invalid query parameters"));
    }
    let limit = query.n as usize;
    let precise = query.precise;

    let paths = tokio::task::spawn_blocking(move || state.recall.in_progress(limit, precise))
        .await
        .map_err(|_| ApiError::internal("in-progress task panicked"))??;

    Ok(join_paths(&paths))
}

fn join_paths(paths: &[storm_tape_domain::PhysicalPath]) -> String {
    paths.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime: u64,
}

static START_TIME: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Process liveness and uptime, for operational monitoring.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Healthcheck endpoint", body = HealthResponse)),
)]
pub(crate) async fn health() -> impl IntoResponse {
    let body = HealthResponse { status: "up", version: env!("CARGO_PKG_VERSION"), uptime: START_TIME.elapsed().as_secs() };

    (
        [(header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"), (header::PRAGMA, "no-cache")],
        Json(body),
    )
}
