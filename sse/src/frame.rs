use axum::response::sse::Event;
use chrono::{DateTime, SecondsFormat, Utc};
use eventlog::LogEntry;
use serde_json::json;
use std::time::Duration;

/// Name of the heartbeat event when heartbeats are sent as events.
pub const PING_EVENT: &str = "ping";

/// `event: <type>`, `data: <json>`, `id: <entry id>`.
pub fn entry(entry: &LogEntry) -> Event {
    // Serialized JSON never contains a raw line break, so it fits one data line.
    Event::default()
        .event(single_line(&entry.envelope.event_type))
        .data(entry.envelope.payload.to_string())
        .id(entry.id.to_string())
}

/// Connection preamble: the client's base reconnect delay plus a comment
/// naming the connection.
pub fn preamble(retry: Duration, connection_id: &str) -> Event {
    Event::default()
        .retry(retry)
        .comment(format!("connected {}", single_line(connection_id)))
}

pub fn ping(at: DateTime<Utc>) -> Event {
    let data = json!({ "ts": at.to_rfc3339_opts(SecondsFormat::Millis, true) });
    Event::default().event(PING_EVENT).data(data.to_string())
}

pub fn comment(text: &str) -> Event {
    Event::default().comment(single_line(text))
}

/// axum rejects line breaks in every field but `data`.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
