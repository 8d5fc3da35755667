use crate::audio::session::SessionInfo;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde_json::json;

fn session_view(info: &SessionInfo, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "session_id": info.session_id,
        "peer_addr": info.peer_addr,
        "created_at": info.created_at.to_rfc3339(),
        "age_seconds": now.signed_duration_since(info.created_at).num_seconds()
    })
}

/// List live relay sessions, oldest first.
///
/// GET /api/v1/sessions
pub async fn list_sessions(state: web::Data<AppState>) -> HttpResponse {
    let now = chrono::Utc::now();
    let sessions: Vec<serde_json::Value> = state
        .sessions
        .list()
        .into_iter()
        .map(|info| session_view(&info, now))
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": now.to_rfc3339(),
        "active": sessions.len(),
        "max": state.sessions.max_sessions(),
        "sessions": sessions
    }))
}

/// Look up one live session.
///
/// GET /api/v1/sessions/{session_id}
pub async fn get_session(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let info = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("No live session '{}'", session_id)))?;

    Ok(HttpResponse::Ok().json(session_view(&info, Utc::now())))
}
