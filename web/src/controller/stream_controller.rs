use crate::controller::ApiResponse;
use crate::extractors::stream_scope::StreamScope;
use crate::{AppState, Error};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use eventlog::StreamHealth;
use serde::Serialize;
use serde_json::json;

use log::*;

#[derive(Debug, Serialize)]
struct SessionReport {
    connection_id: String,
    group: String,
    opened_at: DateTime<Utc>,
    age_secs: i64,
}

#[derive(Debug, Serialize)]
struct StreamReport {
    stream: String,
    #[serde(flatten)]
    health: StreamHealth,
    active_sessions: usize,
    sessions: Vec<SessionReport>,
}

/// GET stream length, consumer groups with their pending depth and last
/// delivered id, and the SSE sessions currently open on the stream.
pub async fn read(
    StreamScope(scope): StreamScope,
    State(app_state): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    let stream = app_state.stream_for(scope.as_deref())?;
    debug!("GET Stream report for {stream}");

    let health = app_state.consumer_groups.introspect(&stream).await?;
    let now = Utc::now();
    let sessions: Vec<SessionReport> = app_state
        .connections
        .connections_for_stream(&stream)
        .into_iter()
        .map(|(id, info)| SessionReport {
            connection_id: id.as_str().to_string(),
            group: info.identity.group,
            opened_at: info.opened_at,
            age_secs: (now - info.opened_at).num_seconds(),
        })
        .collect();

    Ok(Json(ApiResponse::new(
        StatusCode::OK.into(),
        StreamReport {
            stream,
            health,
            active_sessions: sessions.len(),
            sessions,
        },
    )))
}

/// DELETE every entry of the stream. Open sessions keep streaming new events.
pub async fn clear_backlog(
    StreamScope(scope): StreamScope,
    State(app_state): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    let stream = app_state.stream_for(scope.as_deref())?;
    debug!("DELETE Backlog of {stream}");

    let removed = app_state.consumer_groups.clear_backlog(&stream).await?;

    Ok(Json(ApiResponse::new(
        StatusCode::OK.into(),
        json!({ "removed": removed }),
    )))
}
