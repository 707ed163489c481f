//! Request/response execution handlers.
//!
//! `POST /exec` runs code in a throwaway context. `POST /session` and
//! `POST /exec/{session_id}` give callers an addressable interpreter whose
//! bindings survive between requests. Failures of the submitted code are
//! returned with a 200 status inside the result body; only relay-level
//! failures map to error statuses (see [`ApiError`]).

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use ouros_relay::{BusyPolicy, ExecutionResult, SessionInfo};
use serde::{Deserialize, Serialize};

use crate::{api_error::ApiError, router::AppState};

/// Body of both execution endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

/// Response of `POST /session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: String,
}

/// Response of `GET /sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionInfo>,
}

/// `POST /exec`: stateless execution against a fresh context.
pub async fn exec_stateless(
    State(state): State<AppState>,
    payload: Result<Json<CodeRequest>, JsonRejection>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let Json(request) = payload?;
    let result = state.store.execute_ephemeral(&request.code).await?;
    Ok(Json(result))
}

/// `POST /session`: allocates a new session.
pub async fn create_session(State(state): State<AppState>) -> Result<Json<CreatedSession>, ApiError> {
    let session = state.store.create()?;
    Ok(Json(CreatedSession {
        session_id: session.id().to_owned(),
    }))
}

/// `POST /exec/{session_id}`: stateful execution.
///
/// Waits up to the configured busy timeout if the session is already
/// executing (for example on behalf of a live channel).
pub async fn exec_in_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: Result<Json<CodeRequest>, JsonRejection>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let Json(request) = payload?;
    let result = state
        .store
        .execute(&session_id, &request.code, None, BusyPolicy::WaitBounded)
        .await?;
    Ok(Json(result))
}

/// `DELETE /session/{session_id}`: explicit teardown.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.destroy(&session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /sessions`
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionList> {
    Json(SessionList {
        sessions: state.store.list(),
    })
}
