use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::{EntryId, LogEntry};
use crate::error::{BackendErrorKind, Error, ErrorKind};
use crate::{EventLog, ReadCursor, StartPosition};

/// Slack on top of the block duration before a read counts as hung.
const READ_GRACE: Duration = Duration::from_secs(2);

/// A `(group, consumer)` pair on a stream, owned by exactly one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerIdentity {
    pub stream: String,
    pub group: String,
    pub consumer: String,
}

/// Result of a blocking read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Entries(Vec<LogEntry>),
    /// Nothing arrived within the block duration.
    Timeout,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupHealth {
    pub consumer_count: usize,
    pub pending_count: usize,
    /// Newest entry handed to the group, `None` before the first delivery.
    pub last_delivered_id: Option<String>,
}

/// Read-only stream health for operator tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamHealth {
    pub length: usize,
    pub group_count: usize,
    pub groups: BTreeMap<String, GroupHealth>,
}

/// Creates and owns per-connection consumer identities over the shared log.
pub struct ConsumerGroupManager {
    log: Arc<dyn EventLog>,
    group_prefix: String,
    /// Consumer registered on each dedicated group, keyed by (stream, group).
    claims: DashMap<(String, String), String>,
}

impl ConsumerGroupManager {
    pub fn new(log: Arc<dyn EventLog>, group_prefix: impl Into<String>) -> Self {
        Self {
            log,
            group_prefix: group_prefix.into(),
            claims: DashMap::new(),
        }
    }

    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// Creates `group` on `stream` starting at the tail. Idempotent: a group
    /// that already exists counts as success.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), Error> {
        match self.log.create_group(stream, group, StartPosition::Tail).await {
            Ok(()) => {
                debug!("Created consumer group {group} on {stream}");
                Ok(())
            }
            Err(e) if e.is_group_exists() => {
                debug!("Consumer group {group} on {stream} already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Registers the single consumer of a dedicated group and returns its name,
    /// derived from the owning connection's token. A group that already has a
    /// different consumer is rejected: sharing it would split entries between
    /// connections instead of broadcasting them.
    pub fn register_consumer(
        &self,
        stream: &str,
        group: &str,
        connection_token: &str,
    ) -> Result<String, Error> {
        let consumer = format!("consumer-{connection_token}");

        match self.claims.entry((stream.to_string(), group.to_string())) {
            Entry::Occupied(existing) if existing.get() != &consumer => {
                Err(Error::new(ErrorKind::GroupClaimed {
                    group: group.to_string(),
                }))
            }
            Entry::Occupied(_) => Ok(consumer),
            Entry::Vacant(slot) => {
                slot.insert(consumer.clone());
                Ok(consumer)
            }
        }
    }

    /// Opens the identity for a new connection: a dedicated group positioned at
    /// the stream tail with one consumer in it.
    pub async fn open_identity(
        &self,
        stream: &str,
        connection_token: &str,
    ) -> Result<ConsumerIdentity, Error> {
        let group = format!("{}:{connection_token}", self.group_prefix);

        self.ensure_group(stream, &group).await?;
        let consumer = self.register_consumer(stream, &group, connection_token)?;

        Ok(ConsumerIdentity {
            stream: stream.to_string(),
            group,
            consumer,
        })
    }

    /// Waits up to `block` for entries visible to `identity`. A backend that
    /// has not answered shortly after `block` fails the read with
    /// [`BackendErrorKind::Timeout`].
    pub async fn read_next(
        &self,
        identity: &ConsumerIdentity,
        cursor: ReadCursor,
        count: usize,
        block: Duration,
    ) -> Result<ReadOutcome, Error> {
        let read = self.log.read_group(
            &identity.stream,
            &identity.group,
            &identity.consumer,
            cursor,
            count,
            block,
        );
        let entries = tokio::time::timeout(block + READ_GRACE, read)
            .await
            .map_err(|_| Error::new(ErrorKind::Backend(BackendErrorKind::Timeout)))??;

        if entries.is_empty() {
            Ok(ReadOutcome::Timeout)
        } else {
            Ok(ReadOutcome::Entries(entries))
        }
    }

    /// Marks an entry as processed, removing it from the pending set.
    pub async fn acknowledge(&self, identity: &ConsumerIdentity, id: EntryId) -> Result<(), Error> {
        let acknowledged = self
            .log
            .ack(&identity.stream, &identity.group, &[id])
            .await?;

        if acknowledged == 0 {
            trace!("Entry {id} was not pending for {}", identity.consumer);
        }

        Ok(())
    }

    pub async fn introspect(&self, stream: &str) -> Result<StreamHealth, Error> {
        let info = self.log.info(stream).await?;

        Ok(StreamHealth {
            length: info.length,
            group_count: info.groups.len(),
            groups: info
                .groups
                .into_iter()
                .map(|group| {
                    (
                        group.name,
                        GroupHealth {
                            consumer_count: group.consumers,
                            pending_count: group.pending,
                            last_delivered_id: group
                                .last_delivered_id
                                .map(|id| id.to_string()),
                        },
                    )
                })
                .collect(),
        })
    }

    /// Drops the identity. Group teardown on the backend is best effort: an
    /// abandoned group only costs memory.
    pub async fn release(&self, identity: &ConsumerIdentity) {
        self.claims
            .remove(&(identity.stream.clone(), identity.group.clone()));
        self.log
            .release_consumer(&identity.stream, &identity.group, &identity.consumer)
            .await;

        match self.log.destroy_group(&identity.stream, &identity.group).await {
            Ok(_) => debug!("Released consumer group {}", identity.group),
            Err(e) => debug!(
                "Leaving consumer group {} behind on {}: {e}",
                identity.group, identity.stream
            ),
        }
    }

    /// Trims every entry from the stream. Groups and their pending sets stay.
    pub async fn clear_backlog(&self, stream: &str) -> Result<usize, Error> {
        let removed = self.log.trim(stream, 0).await?;
        info!("Cleared {removed} entries from stream {stream}");
        Ok(removed)
    }
}
