use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use stride_core::PlanError;
use stride_core::adherence::{self, AdherenceInput, AdherencePolicy};
use stride_core::audit::{ChangeCursor, ChangeFilter, stream_changes};
use stride_core::auth::{self, Caller, TokenConfig};
use stride_core::calendar;
use stride_core::edits::{self, InstancePatch};
use stride_core::overrides::{self, OverridePolicy, OverrideRequest};
use stride_core::program::{self, ProgramBundle};
use stride_core::state::mark_instance_state;
use stride_db::models::{
    AdherenceStatus, InstanceState, Modification, OverrideReason, PlanChangeEvent,
    PlannedEntityRef,
};

const DEFAULT_CHANGE_LIMIT: usize = 100;
const MAX_CHANGE_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub tokens: TokenConfig,
    pub override_policy: OverridePolicy,
    pub adherence_policy: AdherencePolicy,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    retryable: bool,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
            retryable: false,
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.into(),
            retryable: false,
        }
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        let status = match &err {
            PlanError::Validation(_) => StatusCode::BAD_REQUEST,
            PlanError::Conflict { .. } => StatusCode::CONFLICT,
            PlanError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PlanError::NotFound(_) => StatusCode::NOT_FOUND,
            PlanError::Forbidden(_) => StatusCode::FORBIDDEN,
            PlanError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }
        let body = serde_json::json!({
            "error": self.message,
            "retryable": self.retryable,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult = Result<axum::response::Response, AppError>;

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Caller identified by the `Authorization: Bearer <owner token>` header.
pub struct Authenticated(pub Caller);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("authorization must use the Bearer scheme"))?;
        let caller = auth::validate_owner_token(&state.tokens, token.trim()).map_err(|e| {
            tracing::warn!(error = %e, "rejected owner token");
            AppError::unauthorized("invalid owner token")
        })?;
        Ok(Self(caller))
    }
}

fn parse_entity(raw: &str) -> Result<PlannedEntityRef, AppError> {
    raw.parse::<PlannedEntityRef>()
        .map_err(|e| AppError::bad_request(e.to_string()))
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ChangesQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub after: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ChangesPage {
    pub events: Vec<PlanChangeEvent>,
    /// Pass as `after` to fetch the next page; absent on the last page.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StateBody {
    pub state: InstanceState,
}

fn default_reason() -> String {
    "api".to_string()
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub patch: InstancePatch,
    #[serde(default = "default_reason")]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct SwapBody {
    pub a: String,
    pub b: String,
    #[serde(default = "default_reason")]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveBody {
    pub week: i32,
    pub day: i32,
    #[serde(default = "default_reason")]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleBody {
    pub date: NaiveDate,
    #[serde(default = "default_reason")]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    #[serde(default = "default_reason")]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AdherenceBody {
    pub status: AdherenceStatus,
    pub actual_ref: Option<String>,
    pub similarity_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct OverrideBody {
    pub program_id: Uuid,
    pub date: NaiveDate,
    pub reason_code: OverrideReason,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub modification: Modification,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/programs", get(list_programs).post(create_program))
        .route("/api/programs/active", get(active_program))
        .route("/api/programs/{id}", get(get_program))
        .route("/api/programs/{id}/calendar", get(get_calendar))
        .route("/api/programs/{id}/calendar/project", post(project_calendar))
        .route("/api/programs/{id}/targets", get(get_targets))
        .route("/api/programs/{id}/overrides", get(list_overrides))
        .route("/api/programs/{id}/adherence", get(adherence_summary))
        .route("/api/programs/{id}/changes", get(program_changes))
        .route("/api/changes", get(owner_changes))
        .route("/api/instances/swap", post(swap_instances))
        .route("/api/instances/{entity}/state", post(mark_state))
        .route("/api/instances/{entity}/edit", post(edit_instance))
        .route("/api/instances/{entity}/move", post(move_instance))
        .route("/api/instances/{entity}/reschedule", post(reschedule_instance))
        .route("/api/instances/{entity}/cancel", post(cancel_instance))
        .route(
            "/api/instances/{entity}/adherence",
            get(adherence_history).post(record_adherence),
        )
        .route("/api/overrides", post(request_override))
        .route("/api/overrides/{id}/approve", post(approve_override))
        .route("/api/overrides/{id}/reject", post(reject_override))
        .route("/api/overrides/{id}/undo", post(undo_override))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("stride serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("stride serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}

// ---------------------------------------------------------------------------
// Handlers: programs
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_programs(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
) -> ApiResult {
    let all = program::list_programs(&state.pool, caller.owner_id).await?;
    Ok(Json(all).into_response())
}

async fn create_program(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(bundle): Json<ProgramBundle>,
) -> ApiResult {
    caller.require_owner(bundle.owner_id, "program bundle")?;
    let created = program::create_program(&state.pool, &bundle).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn active_program(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Query(q): Query<DateQuery>,
) -> ApiResult {
    let date = q.date.unwrap_or_else(|| Utc::now().date_naive());
    let active = program::get_active_program(&state.pool, caller.owner_id, date)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("active program on {date}")))?;
    Ok(Json(active).into_response())
}

async fn get_program(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<Uuid>,
) -> ApiResult {
    auth::authorize_program(&state.pool, &caller, id).await?;
    let detail = program::get_program_with_items(&state.pool, id).await?;
    Ok(Json(detail).into_response())
}

async fn get_calendar(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<Uuid>,
    Query(range): Query<RangeQuery>,
) -> ApiResult {
    auth::authorize_program(&state.pool, &caller, id).await?;
    let events = calendar::list_calendar(&state.pool, id, range.from, range.to).await?;
    Ok(Json(events).into_response())
}

async fn project_calendar(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<Uuid>,
    Json(range): Json<RangeQuery>,
) -> ApiResult {
    auth::authorize_program(&state.pool, &caller, id).await?;
    let events = calendar::project(&state.pool, id, range.from, range.to).await?;
    Ok(Json(events).into_response())
}

async fn get_targets(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<Uuid>,
    Query(q): Query<DateQuery>,
) -> ApiResult {
    auth::authorize_program(&state.pool, &caller, id).await?;
    let date = q.date.unwrap_or_else(|| Utc::now().date_naive());
    let targets = overrides::effective_targets(&state.pool, caller.owner_id, id, date).await?;
    Ok(Json(targets).into_response())
}

async fn list_overrides(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<Uuid>,
    Query(q): Query<DateQuery>,
) -> ApiResult {
    auth::authorize_program(&state.pool, &caller, id).await?;
    let date = q
        .date
        .ok_or_else(|| AppError::bad_request("date query parameter is required"))?;
    let history = overrides::list_overrides(&state.pool, caller.owner_id, id, date).await?;
    Ok(Json(history).into_response())
}

async fn adherence_summary(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<Uuid>,
) -> ApiResult {
    auth::authorize_program(&state.pool, &caller, id).await?;
    let summary = adherence::adherence_summary(&state.pool, id).await?;
    Ok(Json(summary).into_response())
}

// ---------------------------------------------------------------------------
// Handlers: change log
// ---------------------------------------------------------------------------

async fn collect_changes(pool: &PgPool, filter: ChangeFilter, q: &ChangesQuery) -> ApiResult {
    let limit = q.limit.unwrap_or(DEFAULT_CHANGE_LIMIT).clamp(1, MAX_CHANGE_LIMIT);
    let start = q
        .after
        .as_deref()
        .map(str::parse::<ChangeCursor>)
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    // One extra row tells whether another page exists.
    let page_size = i64::try_from(limit + 1).unwrap_or(i64::MAX);
    let mut events: Vec<PlanChangeEvent> = stream_changes(pool.clone(), filter, page_size, start)
        .take(limit + 1)
        .try_collect()
        .await?;
    let has_more = events.len() > limit;
    events.truncate(limit);
    let next_cursor = if has_more {
        events.last().map(|e| ChangeCursor::from(e).to_string())
    } else {
        None
    };
    Ok(Json(ChangesPage {
        events,
        next_cursor,
    })
    .into_response())
}

async fn program_changes(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<Uuid>,
    Query(q): Query<ChangesQuery>,
) -> ApiResult {
    auth::authorize_program(&state.pool, &caller, id).await?;
    collect_changes(&state.pool, ChangeFilter::Program(id), &q).await
}

async fn owner_changes(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Query(q): Query<ChangesQuery>,
) -> ApiResult {
    let (Some(from), Some(to)) = (q.from, q.to) else {
        return Err(AppError::bad_request("from and to query parameters are required"));
    };
    let filter = ChangeFilter::Owner {
        owner_id: caller.owner_id,
        from,
        to,
    };
    collect_changes(&state.pool, filter, &q).await
}

// ---------------------------------------------------------------------------
// Handlers: instances
// ---------------------------------------------------------------------------

async fn mark_state(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(raw): Path<String>,
    Json(body): Json<StateBody>,
) -> ApiResult {
    let entity = parse_entity(&raw)?;
    auth::authorize_entity(&state.pool, &caller, entity).await?;
    let instance = mark_instance_state(&state.pool, entity, body.state).await?;
    Ok(Json(instance).into_response())
}

async fn edit_instance(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(raw): Path<String>,
    Json(body): Json<EditBody>,
) -> ApiResult {
    let entity = parse_entity(&raw)?;
    auth::authorize_entity(&state.pool, &caller, entity).await?;
    let event = edits::edit_instance(&state.pool, entity, &body.patch, &body.reason).await?;
    Ok(Json(event).into_response())
}

async fn swap_instances(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(body): Json<SwapBody>,
) -> ApiResult {
    let a = parse_entity(&body.a)?;
    let b = parse_entity(&body.b)?;
    auth::authorize_entity(&state.pool, &caller, a).await?;
    auth::authorize_entity(&state.pool, &caller, b).await?;
    let events = edits::swap_instances(&state.pool, a, b, &body.reason).await?;
    Ok(Json(events).into_response())
}

async fn move_instance(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(raw): Path<String>,
    Json(body): Json<MoveBody>,
) -> ApiResult {
    let entity = parse_entity(&raw)?;
    auth::authorize_entity(&state.pool, &caller, entity).await?;
    let event =
        edits::move_instance(&state.pool, entity, body.week, body.day, &body.reason).await?;
    Ok(Json(event).into_response())
}

async fn reschedule_instance(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(raw): Path<String>,
    Json(body): Json<RescheduleBody>,
) -> ApiResult {
    let entity = parse_entity(&raw)?;
    auth::authorize_entity(&state.pool, &caller, entity).await?;
    let event = edits::reschedule_instance(&state.pool, entity, body.date, &body.reason).await?;
    Ok(Json(event).into_response())
}

async fn cancel_instance(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(raw): Path<String>,
    Json(body): Json<ReasonBody>,
) -> ApiResult {
    let entity = parse_entity(&raw)?;
    auth::authorize_entity(&state.pool, &caller, entity).await?;
    let event = edits::cancel_instance(&state.pool, entity, &body.reason).await?;
    Ok(Json(event).into_response())
}

async fn record_adherence(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(raw): Path<String>,
    Json(body): Json<AdherenceBody>,
) -> ApiResult {
    let entity = parse_entity(&raw)?;
    auth::authorize_entity(&state.pool, &caller, entity).await?;
    let input = AdherenceInput {
        owner_id: caller.owner_id,
        planned: entity,
        status: body.status,
        actual_ref: body.actual_ref,
        similarity_score: body.similarity_score,
    };
    let outcome = adherence::record_adherence(&state.pool, &state.adherence_policy, &input).await?;
    Ok((StatusCode::CREATED, Json(outcome)).into_response())
}

async fn adherence_history(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(raw): Path<String>,
) -> ApiResult {
    let entity = parse_entity(&raw)?;
    auth::authorize_entity(&state.pool, &caller, entity).await?;
    let history = adherence::adherence_history(&state.pool, entity).await?;
    Ok(Json(history).into_response())
}

// ---------------------------------------------------------------------------
// Handlers: overrides
// ---------------------------------------------------------------------------

async fn request_override(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(body): Json<OverrideBody>,
) -> ApiResult {
    auth::authorize_program(&state.pool, &caller, body.program_id).await?;
    let request = OverrideRequest {
        owner_id: caller.owner_id,
        program_id: body.program_id,
        date: body.date,
        reason_code: body.reason_code,
        justification: body.justification,
        modification: body.modification,
    };
    let created = overrides::request_override(&state.pool, &state.override_policy, &request).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn approve_override(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<Uuid>,
) -> ApiResult {
    auth::authorize_override(&state.pool, &caller, id).await?;
    Ok(Json(overrides::approve_override(&state.pool, id).await?).into_response())
}

async fn reject_override(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<Uuid>,
) -> ApiResult {
    auth::authorize_override(&state.pool, &caller, id).await?;
    Ok(Json(overrides::reject_override(&state.pool, id).await?).into_response())
}

async fn undo_override(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<Uuid>,
) -> ApiResult {
    auth::authorize_override(&state.pool, &caller, id).await?;
    Ok(Json(overrides::undo_override(&state.pool, id).await?).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
