//! Run API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tierflow_core::{
    events::{EventFilter, EventRecord},
    run::TierStatus,
    status::{RunFilter, RunRecord},
    RunError, RunOutcome, RunPhase, RunSeed,
};

use crate::state::AppState;

/// Maximum allowed limit for list queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for list queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for starting a run
#[derive(Debug, Deserialize)]
pub struct CreateRunBody {
    /// Client the run belongs to
    pub client_id: String,
    /// Plan template name, if the client has one
    pub plan: Option<String>,
    /// Opaque seed payload forwarded to the task endpoint
    #[serde(default)]
    pub payload: Value,
}

/// Query parameters for listing runs
#[derive(Debug, Deserialize)]
pub struct ListRunsParams {
    pub phase: Option<String>,
    pub client_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query parameters for listing a run's events
#[derive(Debug, Deserialize)]
pub struct ListEventsParams {
    pub event_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub run_id: String,
    pub status: String,
}

/// A run record as returned by the API
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: String,
    pub client_id: String,
    pub plan: Option<String>,
    pub payload: Value,
    pub phase: RunPhase,
    pub cursor: Option<String>,
    pub outcome: Option<RunOutcome>,
    pub created_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<TierStatus>>,
}

impl From<RunRecord> for RunResponse {
    fn from(record: RunRecord) -> Self {
        Self {
            run_id: record.run_id,
            client_id: record.client_id,
            plan: record.plan,
            payload: record.payload,
            phase: record.phase,
            cursor: record.cursor,
            outcome: record.outcome,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
            finished_at: record.finished_at.map(|t| t.to_rfc3339()),
            history: None,
        }
    }
}

/// Response for listing runs
#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<RunResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Response for listing a run's events
#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    pub events: Vec<EventRecord>,
    pub total: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct RunErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<RunErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(RunErrorResponse {
            error: error.into(),
        }),
    )
}

impl From<RunError> for RunErrorResponse {
    fn from(err: RunError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

fn run_error(err: RunError) -> ApiError {
    let status = match &err {
        RunError::NotFound(_) => StatusCode::NOT_FOUND,
        RunError::InvalidSeed(_) => StatusCode::BAD_REQUEST,
        RunError::AlreadyTerminal { .. } => StatusCode::CONFLICT,
        RunError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        RunError::Status(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(RunErrorResponse::from(err)))
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a new run
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRunBody>,
) -> Result<(StatusCode, Json<CreateRunResponse>), ApiError> {
    let mut seed = RunSeed::new(body.client_id).with_payload(body.payload);
    if let Some(plan) = body.plan {
        seed = seed.with_plan(plan);
    }

    let run_id = state.runs().start(seed).await.map_err(run_error)?;
    Ok((StatusCode::ACCEPTED, Json(CreateRunResponse { run_id })))
}

/// List runs with optional filters
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRunsParams>,
) -> Result<Json<ListRunsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = RunFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref phase) = params.phase {
        let phase = RunPhase::parse(phase)
            .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("Unknown phase: {}", phase)))?;
        filter = filter.with_phase(phase);
    }

    if let Some(ref client_id) = params.client_id {
        filter = filter.with_client_id(client_id);
    }

    let runs = state.runs().list(&filter).map_err(run_error)?;
    let total = state.runs().count(&filter).map_err(run_error)?;

    Ok(Json(ListRunsResponse {
        runs: runs.into_iter().map(RunResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Get a run with its tier history
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    let record = state
        .runs()
        .get(&id)
        .map_err(run_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Run not found: {}", id)))?;
    let history = state.runs().history(&id).map_err(run_error)?;

    let mut response = RunResponse::from(record);
    response.history = Some(history);
    Ok(Json(response))
}

/// Request cancellation of a run
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CancelRunResponse>), ApiError> {
    state.runs().cancel(&id).await.map_err(run_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelRunResponse {
            run_id: id,
            status: "cancelling".to_string(),
        }),
    ))
}

/// List the events recorded for a run
pub async fn list_run_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ListEventsParams>,
) -> Result<Json<ListEventsResponse>, ApiError> {
    if state.runs().get(&id).map_err(run_error)?.is_none() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Run not found: {}", id),
        ));
    }

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = EventFilter::new()
        .with_run_id(&id)
        .with_limit(limit)
        .with_offset(offset);
    if let Some(ref event_type) = params.event_type {
        filter = filter.with_event_type(event_type);
    }

    let internal = |e: tierflow_core::events::EventError| {
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    };
    let events = state.event_store().query(&filter).map_err(internal)?;
    let total = state.event_store().count(&filter).map_err(internal)?;

    Ok(Json(ListEventsResponse { events, total }))
}
