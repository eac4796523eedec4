use axum::response::sse::Event;
use chrono::Utc;
use eventlog::{ConsumerGroupManager, ConsumerIdentity, EntryId, Error, LogEntry, ReadCursor, ReadOutcome};
use log::*;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::frame;
use crate::sink::FrameSink;

/// Consecutive backend read failures tolerated before the session gives up.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 5;

/// How idle connections are kept alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStyle {
    /// A named `ping` event carrying a timestamp.
    Event,
    /// A `: ping` comment line, invisible to application handlers.
    Comment,
}

#[derive(Debug, PartialEq, Eq)]
pub struct HeartbeatStyleParseError(String);

impl fmt::Display for HeartbeatStyleParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown heartbeat style {:?}, expected event or comment", self.0)
    }
}

impl std::error::Error for HeartbeatStyleParseError {}

impl FromStr for HeartbeatStyle {
    type Err = HeartbeatStyleParseError;

    fn from_str(style: &str) -> Result<Self, Self::Err> {
        match style.to_lowercase().as_str() {
            "event" => Ok(HeartbeatStyle::Event),
            "comment" => Ok(HeartbeatStyle::Comment),
            _ => Err(HeartbeatStyleParseError(style.to_string())),
        }
    }
}

impl fmt::Display for HeartbeatStyle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeartbeatStyle::Event => write!(f, "event"),
            HeartbeatStyle::Comment => write!(f, "comment"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Longest a single log read blocks. Also the heartbeat interval when idle.
    pub read_block: Duration,
    /// Maximum entries fetched per read.
    pub batch_size: usize,
    pub heartbeat: HeartbeatStyle,
    /// A write blocked longer than this force-closes the connection.
    pub max_write_block: Duration,
    /// Base reconnect delay advertised to the client in the preamble.
    pub retry_hint: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_block: Duration::from_secs(5),
            batch_size: 32,
            heartbeat: HeartbeatStyle::Event,
            max_write_block: Duration::from_secs(30),
            retry_hint: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Closing,
    Failed,
    Terminated,
}

/// Why a session stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client went away. Routine, not an error.
    ClientGone,
    /// A write stayed blocked past `max_write_block`.
    WriteTimeout,
    /// The event log kept failing.
    Backend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub connection_id: ConnectionId,
    pub delivered: usize,
    pub end: SessionEnd,
}

/// Server side of one SSE connection.
///
/// `CONNECTING -> STREAMING -> {CLOSING | FAILED} -> TERMINATED`
///
/// The session owns a dedicated consumer group with a single consumer, so it
/// observes every entry appended after it opened, in log order. An entry is
/// acknowledged only after its frame has been written to the sink.
pub struct Session<S> {
    id: ConnectionId,
    identity: ConsumerIdentity,
    groups: Arc<ConsumerGroupManager>,
    registry: Arc<ConnectionRegistry>,
    sink: S,
    config: SessionConfig,
    state: SessionState,
    cursor: ReadCursor,
    last_sent: Option<EntryId>,
    unacked: Vec<EntryId>,
    delivered: usize,
}

impl<S: FrameSink> Session<S> {
    /// Creates the connection's consumer identity at the stream tail and
    /// registers the connection. Entries appended after this returns are
    /// guaranteed to reach the session.
    pub async fn open(
        groups: Arc<ConsumerGroupManager>,
        registry: Arc<ConnectionRegistry>,
        stream: &str,
        sink: S,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        let id = ConnectionId::new();
        let identity = groups.open_identity(stream, id.as_str()).await?;
        registry.register(id.clone(), identity.clone());

        info!(
            "Opened SSE connection {} on {stream} ({} active)",
            id.as_str(),
            registry.count_for_stream(stream)
        );

        Ok(Self {
            id,
            identity,
            groups,
            registry,
            sink,
            config,
            state: SessionState::Connecting,
            // Start with our own pending set; empty for a fresh consumer.
            cursor: ReadCursor::Pending { after: None },
            last_sent: None,
            unacked: Vec::new(),
            delivered: 0,
        })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn identity(&self) -> &ConsumerIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Streams until the client leaves or the connection fails, then tears the
    /// session down.
    pub async fn run(mut self) -> SessionOutcome {
        let end = self.stream().await;

        match end {
            SessionEnd::ClientGone => {
                self.transition(SessionState::Closing);
                debug!("SSE client for connection {} went away", self.id.as_str());
            }
            SessionEnd::WriteTimeout => {
                self.transition(SessionState::Failed);
                warn!(
                    "Closing SSE connection {}: write blocked for more than {:?}",
                    self.id.as_str(),
                    self.config.max_write_block
                );
            }
            SessionEnd::Backend => {
                self.transition(SessionState::Failed);
                error!(
                    "Closing SSE connection {}: event log unavailable",
                    self.id.as_str()
                );
            }
        }

        self.registry.unregister(&self.id);
        self.groups.release(&self.identity).await;
        self.transition(SessionState::Terminated);

        SessionOutcome {
            connection_id: self.id,
            delivered: self.delivered,
            end,
        }
    }

    async fn stream(&mut self) -> SessionEnd {
        let preamble = frame::preamble(self.config.retry_hint, self.id.as_str());
        if let Err(end) = self.write(preamble).await {
            return end;
        }
        self.transition(SessionState::Streaming);

        let mut read_errors = 0;

        loop {
            self.retry_acks().await;

            let block = match self.cursor {
                ReadCursor::Pending { .. } => Duration::ZERO,
                ReadCursor::New => self.config.read_block,
            };

            let read = tokio::select! {
                _ = self.sink.closed() => return SessionEnd::ClientGone,
                read = self.groups.read_next(&self.identity, self.cursor, self.config.batch_size, block) => read,
            };

            let result = match read {
                Ok(ReadOutcome::Entries(entries)) => {
                    read_errors = 0;
                    self.deliver(entries).await
                }
                Ok(ReadOutcome::Timeout) => {
                    read_errors = 0;
                    match self.cursor {
                        // Pending set fully walked.
                        ReadCursor::Pending { .. } => {
                            self.cursor = ReadCursor::New;
                            Ok(())
                        }
                        ReadCursor::New => self.heartbeat().await,
                    }
                }
                Err(e) => {
                    read_errors += 1;
                    if read_errors > MAX_CONSECUTIVE_READ_ERRORS {
                        error!(
                            "Giving up reading {} for connection {}: {e}",
                            self.identity.stream,
                            self.id.as_str()
                        );
                        return SessionEnd::Backend;
                    }

                    warn!(
                        "Read from {} failed for connection {} ({read_errors}/{MAX_CONSECUTIVE_READ_ERRORS}): {e}",
                        self.identity.stream,
                        self.id.as_str()
                    );
                    // The failed read may have delivered entries we never saw.
                    self.cursor = ReadCursor::Pending { after: None };
                    self.pause_after_error().await
                }
            };

            if let Err(end) = result {
                return end;
            }
        }
    }

    async fn deliver(&mut self, entries: Vec<LogEntry>) -> Result<(), SessionEnd> {
        let batch_end = entries.last().map(|entry| entry.id);

        for entry in entries {
            // Already written on this connection (pending replay).
            if self.last_sent.is_some_and(|last| entry.id <= last) {
                self.acknowledge(entry.id).await;
                continue;
            }

            self.write(frame::entry(&entry)).await?;
            self.last_sent = Some(entry.id);
            self.delivered += 1;
            trace!(
                "Delivered {} ({}) to connection {}",
                entry.id,
                entry.envelope.event_type,
                self.id.as_str()
            );

            self.acknowledge(entry.id).await;
        }

        // Keep walking the pending set until a read past this batch comes
        // back empty.
        if let ReadCursor::Pending { .. } = self.cursor {
            self.cursor = ReadCursor::Pending { after: batch_end };
        }

        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<(), SessionEnd> {
        let frame = match self.config.heartbeat {
            HeartbeatStyle::Event => frame::ping(Utc::now()),
            HeartbeatStyle::Comment => frame::comment("ping"),
        };
        self.write(frame).await
    }

    async fn pause_after_error(&mut self) -> Result<(), SessionEnd> {
        self.heartbeat().await?;

        tokio::select! {
            _ = self.sink.closed() => Err(SessionEnd::ClientGone),
            _ = tokio::time::sleep(self.config.read_block) => Ok(()),
        }
    }

    async fn write(&mut self, frame: Event) -> Result<(), SessionEnd> {
        match tokio::time::timeout(self.config.max_write_block, self.sink.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SessionEnd::ClientGone),
            Err(_) => Err(SessionEnd::WriteTimeout),
        }
    }

    async fn acknowledge(&mut self, id: EntryId) {
        if let Err(e) = self.groups.acknowledge(&self.identity, id).await {
            warn!(
                "Failed to acknowledge {id} for connection {}, will retry: {e}",
                self.id.as_str()
            );
            self.unacked.push(id);
        }
    }

    async fn retry_acks(&mut self) {
        for id in std::mem::take(&mut self.unacked) {
            self.acknowledge(id).await;
        }
    }

    fn transition(&mut self, state: SessionState) {
        debug!(
            "SSE connection {}: {:?} -> {:?}",
            self.id.as_str(),
            self.state,
            state
        );
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PING_EVENT;
    use crate::sink::{self, SinkClosed};
    use async_trait::async_trait;
    use axum::body::BodyDataStream;
    use axum::response::IntoResponse;
    use eventlog::{
        BackendErrorKind, ErrorKind, EventEnvelope, EventLog, MemoryLog, StartPosition,
        StreamInfo,
    };
    use events::{DomainEvent, EventPublisher};
    use futures_util::{FutureExt, StreamExt};
    use serde_json::{json, Value};
    use sse_client::{MessageEvent, ParseOutcome, SseParser};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STREAM: &str = "events";

    struct Harness {
        groups: Arc<ConsumerGroupManager>,
        registry: Arc<ConnectionRegistry>,
        publisher: EventPublisher,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_log(Arc::new(MemoryLog::new()))
        }

        fn with_log(log: Arc<dyn EventLog>) -> Self {
            Self {
                groups: Arc::new(ConsumerGroupManager::new(log.clone(), "sse")),
                registry: Arc::new(ConnectionRegistry::new()),
                publisher: EventPublisher::new(log, STREAM),
            }
        }

        async fn open<S: FrameSink>(&self, sink: S, config: SessionConfig) -> Session<S> {
            Session::open(
                self.groups.clone(),
                self.registry.clone(),
                STREAM,
                sink,
                config,
            )
            .await
            .unwrap()
        }

        /// Opens a session on a channel sink and runs it in the background.
        async fn connect(&self, config: SessionConfig) -> Client {
            let (sink, rx) = sink::channel();
            let session = self.open(sink, config).await;
            let task = tokio::spawn(session.run());

            Client {
                body: sink::into_sse(rx).into_response().into_body().into_data_stream(),
                parser: SseParser::new(),
                task,
            }
        }
    }

    struct Client {
        body: BodyDataStream,
        parser: SseParser,
        task: tokio::task::JoinHandle<SessionOutcome>,
    }

    impl Client {
        async fn next_outcomes(&mut self) -> Vec<ParseOutcome> {
            let frame = tokio::time::timeout(Duration::from_secs(10), self.body.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("session closed the stream")
                .unwrap();
            self.parser.push(&frame)
        }

        /// Collects `count` application events, skipping heartbeats.
        async fn events(&mut self, count: usize) -> Vec<MessageEvent> {
            let mut events = Vec::new();
            while events.len() < count {
                for outcome in self.next_outcomes().await {
                    if let ParseOutcome::Event(event) = outcome {
                        if event.event_type != PING_EVENT {
                            events.push(event);
                        }
                    }
                }
            }
            events
        }
    }

    fn fast() -> SessionConfig {
        SessionConfig {
            read_block: Duration::from_millis(50),
            ..SessionConfig::default()
        }
    }

    fn summary(events: &[MessageEvent]) -> Vec<(String, Value)> {
        events
            .iter()
            .map(|e| (e.event_type.clone(), serde_json::from_str(&e.data).unwrap()))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_session_observes_every_event_in_append_order() {
        let harness = Harness::new();
        let mut clients = Vec::new();
        for _ in 0..4 {
            clients.push(harness.connect(fast()).await);
        }

        let mut expected = Vec::new();
        for n in 0..25 {
            let id = harness
                .publisher
                .publish(DomainEvent::updated("x", json!({ "n": n })))
                .await
                .unwrap();
            expected.push(id.to_string());
        }

        for client in &mut clients {
            let events = client.events(25).await;
            let ids: Vec<String> = events.iter().filter_map(|e| e.id.clone()).collect();
            assert_eq!(ids, expected);
            for (n, event) in events.iter().enumerate() {
                assert_eq!(event.data, json!({ "n": n }).to_string());
            }
        }
    }

    #[tokio::test]
    async fn sessions_start_at_the_tail_of_the_log() {
        let harness = Harness::new();
        let mut early = harness.connect(fast()).await;

        harness
            .publisher
            .publish(DomainEvent::created("x", json!({ "id": 1 })))
            .await
            .unwrap();
        let mut late = harness.connect(fast()).await;
        harness
            .publisher
            .publish(DomainEvent::updated("x", json!({ "id": 1, "field": "v" })))
            .await
            .unwrap();

        assert_eq!(
            summary(&early.events(2).await),
            vec![
                ("x.created".to_string(), json!({ "id": 1 })),
                ("x.updated".to_string(), json!({ "id": 1, "field": "v" })),
            ]
        );
        assert_eq!(
            summary(&late.events(1).await),
            vec![("x.updated".to_string(), json!({ "id": 1, "field": "v" }))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn preamble_then_heartbeats_while_idle() {
        let harness = Harness::new();
        let mut client = harness.connect(SessionConfig::default()).await;

        let preamble = client.next_outcomes().await;
        assert_eq!(preamble[0], ParseOutcome::Retry(Duration::from_secs(1)));
        assert!(matches!(&preamble[1], ParseOutcome::Comment(c) if c.starts_with("connected ")));

        let heartbeat = client.next_outcomes().await;
        assert!(matches!(&heartbeat[0], ParseOutcome::Event(e) if e.event_type == PING_EVENT));
    }

    #[tokio::test(start_paused = true)]
    async fn comment_heartbeats_stay_out_of_the_event_stream() {
        let harness = Harness::new();
        let mut client = harness
            .connect(SessionConfig {
                heartbeat: HeartbeatStyle::Comment,
                ..SessionConfig::default()
            })
            .await;

        client.next_outcomes().await;
        assert_eq!(
            client.next_outcomes().await,
            vec![ParseOutcome::Comment("ping".to_string())]
        );
    }

    #[tokio::test]
    async fn acknowledges_after_writing() {
        let harness = Harness::new();
        let mut client = harness.connect(fast()).await;

        harness
            .publisher
            .publish(DomainEvent::created("x", json!({ "id": 1 })))
            .await
            .unwrap();
        client.events(1).await;
        // One more loop iteration guarantees the ack has landed.
        tokio::time::sleep(Duration::from_millis(120)).await;

        let health = harness.groups.introspect(STREAM).await.unwrap();
        assert_eq!(health.group_count, 1);
        assert!(health.groups.values().all(|g| g.pending_count == 0));
    }

    #[tokio::test]
    async fn client_departure_releases_the_connection() {
        let harness = Harness::new();
        let Client { body, task, .. } = harness.connect(fast()).await;
        assert_eq!(harness.registry.len(), 1);

        drop(body);
        let outcome = task.await.unwrap();

        assert_eq!(outcome.end, SessionEnd::ClientGone);
        assert!(harness.registry.is_empty());
        assert_eq!(harness.groups.introspect(STREAM).await.unwrap().group_count, 0);
    }

    /// Accepts the preamble, then never completes another write.
    #[derive(Default)]
    struct StuckSink {
        sent: usize,
    }

    #[async_trait]
    impl FrameSink for StuckSink {
        async fn send(&mut self, _frame: Event) -> Result<(), SinkClosed> {
            self.sent += 1;
            if self.sent == 1 {
                return Ok(());
            }
            std::future::pending().await
        }

        async fn closed(&self) {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_writers_are_closed_without_losing_entries() {
        let harness = Harness::new();
        let config = SessionConfig {
            max_write_block: Duration::from_secs(2),
            ..SessionConfig::default()
        };

        let stuck = harness.open(StuckSink::default(), config.clone()).await;
        let stuck_group = stuck.identity().group.clone();
        let mut healthy = harness.connect(config).await;

        harness
            .publisher
            .publish(DomainEvent::created("x", json!({ "id": 1 })))
            .await
            .unwrap();

        let outcome = tokio::spawn(stuck.run()).await.unwrap();
        assert_eq!(outcome.end, SessionEnd::WriteTimeout);
        assert_eq!(outcome.delivered, 0);

        let health = harness.groups.introspect(STREAM).await.unwrap();
        assert_eq!(health.length, 1);
        assert!(!health.groups.contains_key(&stuck_group));
        assert_eq!(harness.registry.len(), 1);

        assert_eq!(
            summary(&healthy.events(1).await),
            vec![("x.created".to_string(), json!({ "id": 1 }))]
        );
    }

    /// Delegates to a [`MemoryLog`] but fails the first few reads and acks.
    struct FlakyLog {
        inner: MemoryLog,
        read_failures: AtomicUsize,
        ack_failures: AtomicUsize,
        /// The n-th non-empty read of new entries hands them out, then fails.
        lost_read: Option<usize>,
        new_reads: AtomicUsize,
        hung: bool,
    }

    impl FlakyLog {
        fn new(read_failures: usize, ack_failures: usize) -> Self {
            Self {
                inner: MemoryLog::new(),
                read_failures: AtomicUsize::new(read_failures),
                ack_failures: AtomicUsize::new(ack_failures),
                lost_read: None,
                new_reads: AtomicUsize::new(0),
                hung: false,
            }
        }

        fn losing_read(mut self, n: usize) -> Self {
            self.lost_read = Some(n);
            self
        }

        /// Reads never return.
        fn hung() -> Self {
            Self {
                hung: true,
                ..Self::new(0, 0)
            }
        }

        fn unreachable() -> Error {
            Error::new(ErrorKind::Backend(BackendErrorKind::Unreachable))
        }

        fn trip(counter: &AtomicUsize) -> Result<(), Error> {
            let tripped = counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if tripped {
                Err(Self::unreachable())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl EventLog for FlakyLog {
        async fn append(&self, stream: &str, envelope: &EventEnvelope) -> Result<EntryId, Error> {
            self.inner.append(stream, envelope).await
        }

        async fn create_group(
            &self,
            stream: &str,
            group: &str,
            start: StartPosition,
        ) -> Result<(), Error> {
            self.inner.create_group(stream, group, start).await
        }

        async fn read_group(
            &self,
            stream: &str,
            group: &str,
            consumer: &str,
            cursor: ReadCursor,
            count: usize,
            block: Duration,
        ) -> Result<Vec<LogEntry>, Error> {
            if self.hung {
                return std::future::pending().await;
            }
            if cursor == ReadCursor::New {
                Self::trip(&self.read_failures)?;
            }

            let entries = self
                .inner
                .read_group(stream, group, consumer, cursor, count, block)
                .await?;

            if cursor == ReadCursor::New && !entries.is_empty() {
                let n = self.new_reads.fetch_add(1, Ordering::SeqCst) + 1;
                if self.lost_read == Some(n) {
                    return Err(Self::unreachable());
                }
            }
            Ok(entries)
        }

        async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize, Error> {
            Self::trip(&self.ack_failures)?;
            self.inner.ack(stream, group, ids).await
        }

        async fn info(&self, stream: &str) -> Result<StreamInfo, Error> {
            self.inner.info(stream).await
        }

        async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool, Error> {
            self.inner.destroy_group(stream, group).await
        }

        async fn trim(&self, stream: &str, max_len: usize) -> Result<usize, Error> {
            self.inner.trim(stream, max_len).await
        }
    }

    #[tokio::test]
    async fn failed_acks_are_retried_and_never_resend_the_entry() {
        let harness = Harness::with_log(Arc::new(FlakyLog::new(0, 2)));
        let mut client = harness.connect(fast()).await;

        harness
            .publisher
            .publish(DomainEvent::created("x", json!({ "id": 1 })))
            .await
            .unwrap();
        harness
            .publisher
            .publish(DomainEvent::created("x", json!({ "id": 2 })))
            .await
            .unwrap();

        let events = client.events(2).await;
        assert_eq!(events.len(), 2);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let health = harness.groups.introspect(STREAM).await.unwrap();
        assert!(health.groups.values().all(|g| g.pending_count == 0));

        // Only heartbeats may follow; the entries are never re-sent.
        let mut later = Vec::new();
        while let Some(Some(Ok(frame))) = client.body.next().now_or_never() {
            later.extend(client.parser.push(&frame));
        }
        assert!(later.iter().all(|outcome| match outcome {
            ParseOutcome::Event(e) => e.event_type == PING_EVENT,
            _ => true,
        }));
    }

    #[tokio::test]
    async fn transient_read_failures_do_not_end_the_session() {
        let harness = Harness::with_log(Arc::new(FlakyLog::new(2, 0)));
        let mut client = harness.connect(fast()).await;

        harness
            .publisher
            .publish(DomainEvent::deleted("x", json!({ "id": 5 })))
            .await
            .unwrap();

        assert_eq!(
            summary(&client.events(1).await),
            vec![("x.deleted".to_string(), json!({ "id": 5 }))]
        );
    }

    #[tokio::test]
    async fn recovery_walks_past_entries_already_written() {
        // The second entry is handed out by a read that then fails, while the
        // first is still pending because its acks keep failing. Replaying the
        // pending set finds the first entry again before the second.
        let harness = Harness::with_log(Arc::new(FlakyLog::new(0, 4).losing_read(2)));
        let mut client = harness
            .connect(SessionConfig {
                batch_size: 1,
                ..fast()
            })
            .await;

        let mut expected = Vec::new();
        for id in 1..=2 {
            let entry = harness
                .publisher
                .publish(DomainEvent::created("x", json!({ "id": id })))
                .await
                .unwrap();
            expected.push(entry.to_string());
        }

        let events = client.events(2).await;
        let ids: Vec<String> = events.iter().filter_map(|e| e.id.clone()).collect();
        assert_eq!(ids, expected);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let health = harness.groups.introspect(STREAM).await.unwrap();
        assert!(health.groups.values().all(|g| g.pending_count == 0));
    }

    /// Accepts every frame and counts them.
    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl FrameSink for CountingSink {
        async fn send(&mut self, _frame: Event) -> Result<(), SinkClosed> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn closed(&self) {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn a_hung_backend_keeps_heartbeats_going_then_fails_the_session() {
        let harness = Harness::with_log(Arc::new(FlakyLog::hung()));
        let sent = Arc::new(AtomicUsize::new(0));

        let session = harness
            .open(CountingSink(sent.clone()), SessionConfig::default())
            .await;
        let outcome = session.run().await;

        assert_eq!(outcome.end, SessionEnd::Backend);
        // Preamble plus one heartbeat per tolerated failure.
        assert_eq!(
            sent.load(Ordering::SeqCst),
            1 + MAX_CONSECUTIVE_READ_ERRORS as usize
        );
        assert!(harness.registry.is_empty());
    }

    #[test]
    fn heartbeat_styles_parse_case_insensitively() {
        assert_eq!("EVENT".parse::<HeartbeatStyle>(), Ok(HeartbeatStyle::Event));
        assert_eq!("comment".parse::<HeartbeatStyle>(), Ok(HeartbeatStyle::Comment));
        assert!("bell".parse::<HeartbeatStyle>().is_err());
    }
}
