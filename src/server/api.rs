use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use refinery_common::{FinalSession, StructuredError, SubmitRequest};
use serde::{Deserialize, Serialize};

use crate::enrichment::{FactorCategory, FactorInfo};
use crate::errors::{OrchestratorError, StoreError};
use crate::orchestrator::Orchestrator;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub type SharedState = Arc<AppState>;

// ── Response types ────────────────────────────────────────────────────

/// Status-polling view: the projection plus whether a run is in flight.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    #[serde(flatten)]
    pub session: FinalSession,
    pub running: bool,
}

#[derive(Debug, Deserialize)]
pub struct FactorQuery {
    pub category: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

/// Every failure leaves the server as a `{message, stage}` body.
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(StructuredError),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match &err {
            OrchestratorError::InvalidRequest(_)
            | OrchestratorError::Store(StoreError::InvalidId { .. }) => ApiError::BadRequest(err.to_string()),
            OrchestratorError::SessionNotFound { .. }
            | OrchestratorError::Store(StoreError::NotFound { .. }) => ApiError::NotFound(err.to_string()),
            OrchestratorError::AlreadyRunning { .. } => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_structured()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        OrchestratorError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, StructuredError::new(msg, None)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, StructuredError::new(msg, None)),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, StructuredError::new(msg, None)),
            ApiError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err),
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(submit_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/cancel", post(cancel_session))
        .route("/api/factors", get(list_factors))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn submit_session(
    State(state): State<SharedState>,
    Json(req): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(session_id = ?req.session_id, resume = req.is_resume(), "Submit request received");
    let session = state.orchestrator.submit(req, None).await?;
    Ok(Json(session.project()))
}

async fn list_sessions(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let registry = state.orchestrator.registry();
    let sessions: Vec<SessionStatus> = state
        .orchestrator
        .store()
        .list()
        .await?
        .iter()
        .map(|s| SessionStatus {
            session: s.project(),
            running: registry.is_running(&s.id),
        })
        .collect();
    Ok(Json(sessions))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.store().get(&id).await? {
        Some(session) => Ok(Json(SessionStatus {
            running: state.orchestrator.registry().is_running(&id),
            session: session.project(),
        })),
        None => Err(ApiError::NotFound(format!("Session {} not found", id))),
    }
}

async fn cancel_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.orchestrator.cancel(&id) {
        tracing::info!(session_id = %id, "Cancellation requested");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("No active run for session {}", id)))
    }
}

async fn list_factors(
    State(state): State<SharedState>,
    Query(query): Query<FactorQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let catalogue = state.orchestrator.enrichment().catalogue();
    let factors: Vec<FactorInfo> = match query.category.as_deref() {
        Some(raw) => {
            let category = FactorCategory::parse_loose(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown factor category '{}'", raw)))?;
            catalogue.by_category(category).into_iter().cloned().collect()
        }
        None => catalogue.all().to_vec(),
    };
    Ok(Json(factors))
}
