use axum::http::StatusCode;
use axum::response::IntoResponse;

/// GET liveness of the HTTP server. Does not touch the event log.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}
