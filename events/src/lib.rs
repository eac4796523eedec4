//! Producer side of the real-time pipeline.
//!
//! Domain code calls into this crate whenever an entity changes state. The
//! change is serialized into an [`EventEnvelope`] and appended to the shared
//! event log, from where every open SSE connection picks it up.
//!
//! # Architecture
//!
//! - **DomainEvent**: an entity lifecycle change tagged with one of a small,
//!   closed set of actions (`created`, `updated`, `deleted`, `imported`).
//! - **EventPublisher**: appends events to the log. Publishing never fails the
//!   triggering business operation: log outages are logged and swallowed.
//!
//! Delivery is at-most-once. A publish that fails is dropped, never retried,
//! so it can never be duplicated either.

use eventlog::{scoped_stream, EntryId, Error, EventEnvelope, EventLog};
use log::*;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The closed set of lifecycle actions an entity can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Created,
    Updated,
    Deleted,
    /// Bulk creation through an import.
    Imported,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Created => "created",
            EventAction::Updated => "updated",
            EventAction::Deleted => "deleted",
            EventAction::Imported => "imported",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business-level change emitted after a domain operation completes.
///
/// Entity data is carried as `serde_json::Value` so this crate stays free of
/// any dependency on the entity model.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    /// Entity kind, e.g. `"contact"`. Forms the first half of the event type.
    pub entity: String,
    pub action: EventAction,
    pub payload: Value,
}

impl DomainEvent {
    pub fn new(entity: impl Into<String>, action: EventAction, payload: Value) -> Self {
        Self {
            entity: entity.into(),
            action,
            payload,
        }
    }

    pub fn created(entity: impl Into<String>, payload: Value) -> Self {
        Self::new(entity, EventAction::Created, payload)
    }

    pub fn updated(entity: impl Into<String>, payload: Value) -> Self {
        Self::new(entity, EventAction::Updated, payload)
    }

    pub fn deleted(entity: impl Into<String>, payload: Value) -> Self {
        Self::new(entity, EventAction::Deleted, payload)
    }

    pub fn imported(entity: impl Into<String>, payload: Value) -> Self {
        Self::new(entity, EventAction::Imported, payload)
    }

    /// The SSE event name, `<entity>.<action>`.
    pub fn event_type(&self) -> String {
        format!("{}.{}", self.entity, self.action)
    }
}

/// Appends domain events to the event log.
#[derive(Clone)]
pub struct EventPublisher {
    log: Arc<dyn EventLog>,
    stream: String,
}

impl EventPublisher {
    pub fn new(log: Arc<dyn EventLog>, stream: impl Into<String>) -> Self {
        Self {
            log,
            stream: stream.into(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Returns a publisher writing to the stream dedicated to `scope`.
    pub fn scoped(&self, scope: &str) -> Result<Self, Error> {
        Ok(Self {
            log: Arc::clone(&self.log),
            stream: scoped_stream(&self.stream, Some(scope))?,
        })
    }

    /// Serializes `payload` into an envelope and appends it. This is the raw
    /// operation; most callers want [`EventPublisher::publish`].
    pub async fn append<P>(&self, event_type: &str, payload: &P) -> Result<EntryId, Error>
    where
        P: Serialize + ?Sized,
    {
        let envelope = EventEnvelope::new(event_type, serde_json::to_value(payload)?);
        self.log.append(&self.stream, &envelope).await
    }

    /// Publishes an event. Failures are logged and swallowed so the calling
    /// domain operation proceeds unaffected.
    pub async fn publish(&self, event: DomainEvent) -> Option<EntryId> {
        let event_type = event.event_type();

        match self.append(&event_type, &event.payload).await {
            Ok(id) => {
                debug!("Published {event_type} to {} as {id}", self.stream);
                Some(id)
            }
            Err(e) => {
                error!("Failed to publish {event_type} to {}: {e}", self.stream);
                None
            }
        }
    }

    /// Publishes on a background task so the caller does not wait on the log
    /// round trip at all. Must be called from within a tokio runtime.
    pub fn publish_detached(&self, event: DomainEvent) -> JoinHandle<Option<EntryId>> {
        let publisher = self.clone();
        tokio::spawn(async move { publisher.publish(event).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eventlog::{
        BackendErrorKind, ErrorKind, LogEntry, MemoryLog, ReadCursor, StartPosition, StreamInfo,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// A log whose backend is down.
    #[derive(Default)]
    struct UnreachableLog {
        appends: AtomicUsize,
    }

    fn unreachable() -> Error {
        Error::new(ErrorKind::Backend(BackendErrorKind::Unreachable))
    }

    #[async_trait]
    impl EventLog for UnreachableLog {
        async fn append(&self, _: &str, _: &EventEnvelope) -> Result<EntryId, Error> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            Err(unreachable())
        }
        async fn create_group(&self, _: &str, _: &str, _: StartPosition) -> Result<(), Error> {
            Err(unreachable())
        }
        async fn read_group(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: ReadCursor,
            _: usize,
            _: Duration,
        ) -> Result<Vec<LogEntry>, Error> {
            Err(unreachable())
        }
        async fn ack(&self, _: &str, _: &str, _: &[EntryId]) -> Result<usize, Error> {
            Err(unreachable())
        }
        async fn info(&self, _: &str) -> Result<StreamInfo, Error> {
            Err(unreachable())
        }
        async fn destroy_group(&self, _: &str, _: &str) -> Result<bool, Error> {
            Err(unreachable())
        }
        async fn trim(&self, _: &str, _: usize) -> Result<usize, Error> {
            Err(unreachable())
        }
    }

    #[test]
    fn event_types_join_entity_and_action() {
        assert_eq!(DomainEvent::created("x", json!({})).event_type(), "x.created");
        assert_eq!(DomainEvent::updated("x", json!({})).event_type(), "x.updated");
        assert_eq!(DomainEvent::deleted("x", json!({})).event_type(), "x.deleted");
        assert_eq!(
            DomainEvent::imported("entity", json!({})).event_type(),
            "entity.imported"
        );
    }

    #[tokio::test]
    async fn publish_appends_an_envelope_to_the_stream() {
        let log = Arc::new(MemoryLog::new());
        log.create_group("events", "g", StartPosition::Tail)
            .await
            .unwrap();
        let publisher = EventPublisher::new(log.clone(), "events");

        let id = publisher
            .publish(DomainEvent::created("x", json!({ "id": 1 })))
            .await
            .expect("publish should succeed");

        let entries = log
            .read_group("events", "g", "c", ReadCursor::New, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].envelope.event_type, "x.created");
        assert_eq!(entries[0].envelope.payload, json!({ "id": 1 }));
    }

    #[tokio::test]
    async fn publish_swallows_an_unreachable_log_without_retrying() {
        let log = Arc::new(UnreachableLog::default());
        let publisher = EventPublisher::new(log.clone(), "events");

        let result = publisher
            .publish(DomainEvent::updated("x", json!({ "id": 1 })))
            .await;

        assert_eq!(result, None);
        assert_eq!(log.appends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn append_surfaces_the_error_to_callers_that_ask() {
        let publisher = EventPublisher::new(Arc::new(UnreachableLog::default()), "events");

        let err = publisher.append("x.created", &json!({})).await.unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Backend(BackendErrorKind::Unreachable)
        );
    }

    #[tokio::test]
    async fn detached_publish_completes_in_the_background() {
        let log = Arc::new(MemoryLog::new());
        let publisher = EventPublisher::new(log.clone(), "events");

        let handle = publisher.publish_detached(DomainEvent::deleted("x", json!({ "id": 3 })));
        assert!(handle.await.unwrap().is_some());
        assert_eq!(log.info("events").await.unwrap().length, 1);
    }

    #[test]
    fn scoped_publishers_write_to_tenant_streams() {
        let publisher = EventPublisher::new(Arc::new(MemoryLog::new()), "events");

        assert_eq!(publisher.scoped("acme").unwrap().stream(), "events:acme");
        assert!(publisher.scoped("bad scope").is_err());
    }
}
