use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::ApiError;
use super::AppState;
use crate::catalog::sessions;
use crate::catalog::types::Answer;
use crate::db;
use crate::embedding::store;
use crate::jobs::queue;
use crate::jobs::types::{EmbeddingJob, JobStatus};
use crate::matching::CandidateFilter;
use crate::orchestrator::{self, MatchOutcome};
use crate::pipeline::{spawn_processing, ProcessOptions, ProgressEvent};

const DEFAULT_JOB_LIMIT: usize = 50;
const MAX_JOB_LIMIT: usize = 500;

/// Run a closure against the shared connection on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
{
    let db = state.db.clone();
    let value = tokio::task::spawn_blocking(move || {
        let mut conn = db::lock(&db)?;
        f(&mut conn)
    })
    .await??;
    Ok(value)
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub session_id: String,
    #[serde(default)]
    pub candidate_ids: Option<Vec<String>>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub budget: Option<i64>,
    #[serde(default)]
    pub companion_type: Option<String>,
}

pub async fn match_session(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> Result<Json<MatchOutcome>, ApiError> {
    if request.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("session_id is required".into()));
    }
    let filter = CandidateFilter {
        photographer_ids: request.candidate_ids,
        region: request.region,
        budget: request.budget,
        companion_type: request.companion_type,
    };
    let outcome = orchestrator::match_session(state.db.clone(), request.session_id, filter, state.policy).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub responses: BTreeMap<String, Answer>,
}

#[derive(Debug, Serialize)]
pub struct CreatedSession {
    pub id: String,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreatedSession>), ApiError> {
    let session = blocking(&state, move |conn| {
        sessions::insert_session(conn, request.id.as_deref(), &request.responses)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(CreatedSession { id: session.id })))
}

pub async fn latest_matches(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<MatchOutcome>, ApiError> {
    match orchestrator::latest_results(state.db.clone(), session_id.clone()).await? {
        Some(outcome) => Ok(Json(outcome)),
        None => Err(ApiError::NotFound(format!("no match results for session {session_id}"))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub max_jobs: Option<usize>,
}

/// Start a processing run and stream its progress as server-sent events.
///
/// The run continues if the client disconnects.
pub async fn process_embeddings(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request: ProcessRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ProcessRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))?
    };

    let options = ProcessOptions::from_config(&state.config.pipeline).with_max_jobs(request.max_jobs);
    let (_handle, rx) = spawn_processing(state.db.clone(), state.models.clone(), options);

    let events = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) })
        .map(|ev| Ok::<_, Infallible>(sse_event(&ev)));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn sse_event(event: &ProgressEvent) -> Event {
    let (name, data) = match event {
        ProgressEvent::Started { total } => ("started", json!({ "total": total })),
        ProgressEvent::Progress {
            processed,
            total,
            completed,
            failed,
        } => (
            "progress",
            json!({ "processed": processed, "total": total, "completed": completed, "failed": failed }),
        ),
        ProgressEvent::Finished(summary) => ("done", json!(summary)),
        ProgressEvent::Failed { message } => ("error", json!({ "message": message })),
    };
    Event::default().event(name).data(data.to_string())
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

pub async fn retry_failed(State(state): State<AppState>) -> Result<Json<CountResponse>, ApiError> {
    let count = blocking(&state, |conn| queue::reset_failed(conn)).await?;
    Ok(Json(CountResponse { count }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RecoverParams {
    pub older_than_secs: Option<u64>,
}

pub async fn recover_stuck(
    State(state): State<AppState>,
    Query(params): Query<RecoverParams>,
) -> Result<Json<CountResponse>, ApiError> {
    let secs = params
        .older_than_secs
        .unwrap_or(state.config.pipeline.stuck_timeout_secs);
    let older_than = chrono::Duration::try_seconds(secs as i64)
        .ok_or_else(|| ApiError::BadRequest("older_than_secs out of range".into()))?;
    let count = blocking(&state, move |conn| queue::recover_stuck(conn, older_than)).await?;
    Ok(Json(CountResponse { count }))
}

#[derive(Debug, Default, Deserialize)]
pub struct JobsParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobsParams>,
) -> Result<Json<Vec<EmbeddingJob>>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let limit = params.limit.unwrap_or(DEFAULT_JOB_LIMIT).clamp(1, MAX_JOB_LIMIT);
    let jobs = blocking(&state, move |conn| queue::list_jobs(conn, status, limit)).await?;
    Ok(Json(jobs))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub units_missing_embeddings: u64,
}

pub async fn embedding_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = blocking(&state, |conn| {
        let counts = queue::job_counts(conn)?;
        Ok(StatsResponse {
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            units_missing_embeddings: store::count_missing(conn)?,
        })
    })
    .await?;
    Ok(Json(stats))
}
