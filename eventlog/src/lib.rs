//! Durable, ordered, multi-reader event log.
//!
//! This crate is the storage side of the real-time pipeline. Every state change
//! is appended to a stream as an [`EventEnvelope`] and read back through
//! consumer groups.
//!
//! # Architecture
//!
//! - **EventLog**: object-safe trait over an append-only stream store with
//!   consumer groups, pending sets and acknowledgement.
//! - **MemoryLog**: process-local backend, used when no Redis is configured and
//!   by every test in the workspace.
//! - **RedisLog**: [Redis Streams](https://redis.io/docs/data-types/streams/)
//!   backend for multi-process deployments.
//! - **ConsumerGroupManager**: hands out per-connection consumer identities.
//!
//! # Fan-out vs. load-splitting
//!
//! Entries in a consumer group are *split* among the group's consumers. To
//! broadcast, every SSE connection owns a dedicated group holding exactly one
//! consumer. [`ConsumerGroupManager::open_identity`] creates that pairing and
//! refuses a second consumer on an already claimed group.

pub mod consumer_group;
pub mod entry;
pub mod error;
pub mod memory;
pub mod redis_log;
pub mod scope;

use async_trait::async_trait;
use std::time::Duration;

pub use consumer_group::{ConsumerGroupManager, ConsumerIdentity, GroupHealth, ReadOutcome, StreamHealth};
pub use entry::{EntryId, EventEnvelope, LogEntry};
pub use error::{BackendErrorKind, Error, ErrorKind};
pub use memory::MemoryLog;
pub use redis_log::RedisLog;
pub use scope::{scoped_stream, validate_scope};

/// Where a freshly created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Only entries appended after the group was created.
    Tail,
    /// Every entry still retained by the stream.
    Head,
}

/// Which entries a group read returns.
///
/// A consumer walks its pending set in id order by passing the last id it got
/// back as the next `after`; an empty batch means the walk is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries already delivered to this consumer but never acknowledged,
    /// starting after `after` (from the beginning when `None`). Never blocks.
    Pending { after: Option<EntryId> },
    /// Entries never delivered to any consumer of the group. Delivered entries
    /// join the consumer's pending set.
    New,
}

/// Health of a single consumer group as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: usize,
    pub pending: usize,
    pub last_delivered_id: Option<EntryId>,
}

/// Snapshot of a stream and its consumer groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub length: usize,
    pub groups: Vec<GroupInfo>,
}

/// An append-only, ordered stream store with consumer groups.
///
/// Implementations are responsible for all concurrency control among readers
/// of the same stream; callers never lock around these calls.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends an envelope and returns the log-assigned id.
    async fn append(&self, stream: &str, envelope: &EventEnvelope) -> Result<EntryId, Error>;

    /// Creates a consumer group, creating the stream if needed. Fails with
    /// [`ErrorKind::GroupExists`] when the group is already present.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), Error>;

    /// Reads up to `count` entries for `consumer`. With [`ReadCursor::New`] the
    /// call waits up to `block` for entries to arrive and returns an empty
    /// batch on timeout.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>, Error>;

    /// Removes entries from the group's pending set. Returns how many were
    /// actually pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize, Error>;

    /// Reports stream length and per-group health. A missing stream reports
    /// as empty.
    async fn info(&self, stream: &str) -> Result<StreamInfo, Error>;

    /// Deletes a consumer group. Returns `false` when it did not exist.
    async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool, Error>;

    /// Trims the stream down to at most `max_len` entries, oldest first.
    /// Returns the number of entries removed.
    async fn trim(&self, stream: &str, max_len: usize) -> Result<usize, Error>;

    /// Drops any per-consumer resources held by the backend.
    async fn release_consumer(&self, _stream: &str, _group: &str, _consumer: &str) {}
}
