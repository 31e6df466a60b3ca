//! HTTP handlers for the conversation API.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::TurnOutcome;
use crate::errors::AppError;
use crate::models::session::EndReason;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub message: String,
    pub candidate_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub user_id: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub user_id: i64,
    pub turn_number: u32,
    pub candidate_count: usize,
    pub top_match_percentage: f64,
    pub ended: bool,
    pub end_reason: Option<EndReason>,
    pub presented_job_ids: Vec<Uuid>,
}

/// POST /api/v1/sessions
pub async fn handle_start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, AppError> {
    let (session, message) = state.controller.start_session(req.user_id).await?;

    let response = StartSessionResponse {
        session_id: session.id,
        candidate_count: session.candidates.len(),
        message,
    };
    state.sessions.insert(session);

    Ok(Json(response))
}

/// POST /api/v1/sessions/:id/turns
pub async fn handle_turn(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnOutcome>, AppError> {
    if req.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }

    let handle = state
        .sessions
        .get(id)
        .ok_or_else(|| AppError::InvalidSession(format!("Session {id} not found")))?;

    // Holding the session lock across the whole turn serializes concurrent
    // messages for the same session; other sessions are unaffected.
    let mut session = handle.lock().await;
    let outcome = state
        .controller
        .process_turn(&mut session, req.user_id, &req.message)
        .await?;
    drop(session);

    // Sealed sessions live on only as their persisted snapshot.
    if outcome.ended {
        state.sessions.remove(id);
    }

    Ok(Json(outcome))
}

/// GET /api/v1/sessions/:id
/// Falls back to the persisted snapshot when the in-process registry
/// misses (e.g. after a restart).
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    let session = match state.sessions.get(id) {
        Some(handle) => handle.lock().await.clone(),
        None => state
            .controller
            .load_session(id)
            .await?
            .ok_or_else(|| AppError::InvalidSession(format!("Session {id} not found")))?,
    };

    Ok(Json(SessionSummary {
        session_id: session.id,
        user_id: session.user_id,
        turn_number: session.turn_number,
        candidate_count: session.candidates.len(),
        top_match_percentage: session
            .top_candidate()
            .map(|c| c.match_percentage)
            .unwrap_or(0.0),
        ended: session.is_ended(),
        end_reason: session.end_reason,
        presented_job_ids: session.presented_job_ids.clone(),
    }))
}
