use crate::extractors::stream_scope::StreamScope;
use crate::Error;
use ::sse::{channel, into_sse, Session};
use axum::extract::State;
use axum::http::header::HeaderName;
use axum::response::IntoResponse;
use log::*;
use service::AppState;

/// Keeps nginx from buffering the stream.
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// SSE handler that establishes a long-lived connection for real-time updates.
///
/// The connection's consumer group is created before the response starts, so
/// the client observes every event appended from this point on.
pub(crate) async fn sse_handler(
    StreamScope(scope): StreamScope,
    State(app_state): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    let stream_key = app_state.stream_for(scope.as_deref())?;
    let (sink, frames) = channel();

    let session = Session::open(
        app_state.consumer_groups.clone(),
        app_state.connections.clone(),
        &stream_key,
        sink,
        app_state.config.session_config(),
    )
    .await?;

    debug!(
        "Establishing SSE connection {} on {stream_key}",
        session.id().as_str()
    );

    tokio::spawn(async move {
        let outcome = session.run().await;
        debug!(
            "SSE connection {} ended ({:?}) after {} events",
            outcome.connection_id.as_str(),
            outcome.end,
            outcome.delivered
        );
    });

    // Dropping the body (client gone) closes the channel, which ends the session.
    Ok(([(X_ACCEL_BUFFERING, "no")], into_sse(frames)))
}
