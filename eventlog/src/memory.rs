use async_trait::async_trait;
use chrono::Utc;
use log::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::entry::{EntryId, EventEnvelope, LogEntry};
use crate::error::{Error, ErrorKind};
use crate::{EventLog, GroupInfo, ReadCursor, StartPosition, StreamInfo};

#[derive(Default)]
struct ConsumerState {
    pending: BTreeSet<EntryId>,
}

struct GroupState {
    /// Last id handed out to any consumer of the group. `None` reads from the
    /// start of the stream.
    last_delivered: Option<EntryId>,
    consumers: HashMap<String, ConsumerState>,
}

impl GroupState {
    fn pending(&self) -> usize {
        self.consumers.values().map(|c| c.pending.len()).sum()
    }
}

#[derive(Default)]
struct StreamState {
    entries: BTreeMap<EntryId, EventEnvelope>,
    /// Survives trimming so new ids keep increasing.
    last_id: Option<EntryId>,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn read_new(&mut self, group: &str, consumer: &str, count: usize) -> Result<Vec<LogEntry>, Error> {
        let group = self
            .groups
            .get_mut(group)
            .ok_or_else(|| Error::new(ErrorKind::GroupNotFound))?;

        let lower = match group.last_delivered {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };

        let batch: Vec<LogEntry> = self
            .entries
            .range((lower, Bound::Unbounded))
            .take(count)
            .map(|(id, envelope)| LogEntry {
                id: *id,
                envelope: envelope.clone(),
            })
            .collect();

        let consumer = group.consumers.entry(consumer.to_string()).or_default();
        if let Some(last) = batch.last() {
            group.last_delivered = Some(last.id);
            consumer.pending.extend(batch.iter().map(|entry| entry.id));
        }

        Ok(batch)
    }

    fn read_pending(
        &mut self,
        group: &str,
        consumer: &str,
        after: Option<EntryId>,
        count: usize,
    ) -> Result<Vec<LogEntry>, Error> {
        let group = self
            .groups
            .get_mut(group)
            .ok_or_else(|| Error::new(ErrorKind::GroupNotFound))?;

        let consumer = group.consumers.entry(consumer.to_string()).or_default();
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };

        // Pending ids whose entries were trimmed away are not returned.
        Ok(consumer
            .pending
            .range((lower, Bound::Unbounded))
            .filter_map(|id| {
                self.entries.get(id).map(|envelope| LogEntry {
                    id: *id,
                    envelope: envelope.clone(),
                })
            })
            .take(count)
            .collect())
    }
}

/// In-process [`EventLog`] with Redis Streams semantics.
///
/// Blocking reads park on a [`Notify`] that every append wakes, so a reader
/// never polls.
#[derive(Default)]
pub struct MemoryLog {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StreamState>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventLog for MemoryLog {
    async fn append(&self, stream: &str, envelope: &EventEnvelope) -> Result<EntryId, Error> {
        let id = {
            let mut streams = self.lock();
            let state = streams.entry(stream.to_string()).or_default();
            let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
            let id = EntryId::next_after(state.last_id, now_ms);

            state.entries.insert(id, envelope.clone());
            state.last_id = Some(id);
            id
        };

        trace!("Appended {} to stream {stream} as {id}", envelope.event_type);
        self.appended.notify_waiters();

        Ok(id)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), Error> {
        let mut streams = self.lock();
        let state = streams.entry(stream.to_string()).or_default();

        if state.groups.contains_key(group) {
            return Err(Error::new(ErrorKind::GroupExists));
        }

        let last_delivered = match start {
            StartPosition::Tail => state.last_id,
            StartPosition::Head => None,
        };

        state.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                consumers: HashMap::new(),
            },
        );

        Ok(())
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
        let deadline = Instant::now() + block;

        loop {
            // Register interest before inspecting the stream so an append
            // between the check and the wait still wakes us.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut streams = self.lock();
                let state = streams
                    .get_mut(stream)
                    .ok_or_else(|| Error::new(ErrorKind::GroupNotFound))?;

                let batch = match cursor {
                    ReadCursor::Pending { after } => {
                        return state.read_pending(group, consumer, after, count)
                    }
                    ReadCursor::New => state.read_new(group, consumer, count)?,
                };

                if !batch.is_empty() || block.is_zero() {
                    return Ok(batch);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize, Error> {
        let mut streams = self.lock();
        let group = streams
            .get_mut(stream)
            .and_then(|state| state.groups.get_mut(group))
            .ok_or_else(|| Error::new(ErrorKind::GroupNotFound))?;

        let mut acknowledged = 0;
        for id in ids {
            if group.consumers.values_mut().any(|c| c.pending.remove(id)) {
                acknowledged += 1;
            }
        }

        Ok(acknowledged)
    }

    async fn info(&self, stream: &str) -> Result<StreamInfo, Error> {
        let streams = self.lock();
        let Some(state) = streams.get(stream) else {
            return Ok(StreamInfo::default());
        };

        let mut groups: Vec<GroupInfo> = state
            .groups
            .iter()
            .map(|(name, group)| GroupInfo {
                name: name.clone(),
                consumers: group.consumers.len(),
                pending: group.pending(),
                last_delivered_id: group.last_delivered,
            })
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(StreamInfo {
            length: state.entries.len(),
            groups,
        })
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool, Error> {
        let mut streams = self.lock();
        Ok(streams
            .get_mut(stream)
            .map(|state| state.groups.remove(group).is_some())
            .unwrap_or(false))
    }

    async fn trim(&self, stream: &str, max_len: usize) -> Result<usize, Error> {
        let mut streams = self.lock();
        let Some(state) = streams.get_mut(stream) else {
            return Ok(0);
        };

        let excess = state.entries.len().saturating_sub(max_len);
        for _ in 0..excess {
            state.entries.pop_first();
        }

        Ok(excess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(n: u64) -> EventEnvelope {
        EventEnvelope::new("x.created", json!({ "id": n }))
    }

    async fn drain(log: &MemoryLog, group: &str, consumer: &str) -> Vec<LogEntry> {
        log.read_group("s", group, consumer, ReadCursor::New, 100, Duration::ZERO)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ids_increase_in_append_order() {
        let log = MemoryLog::new();
        let mut previous = None;
        for n in 0..50 {
            let id = log.append("s", &envelope(n)).await.unwrap();
            assert!(previous.map_or(true, |p| p < id));
            previous = Some(id);
        }
    }

    #[tokio::test]
    async fn creating_an_existing_group_reports_group_exists() {
        let log = MemoryLog::new();
        log.create_group("s", "g", StartPosition::Tail).await.unwrap();

        let err = log
            .create_group("s", "g", StartPosition::Tail)
            .await
            .unwrap_err();
        assert!(err.is_group_exists());
    }

    #[tokio::test]
    async fn tail_groups_skip_history_and_head_groups_replay_it() {
        let log = MemoryLog::new();
        log.append("s", &envelope(1)).await.unwrap();

        log.create_group("s", "tail", StartPosition::Tail).await.unwrap();
        log.create_group("s", "head", StartPosition::Head).await.unwrap();
        log.append("s", &envelope(2)).await.unwrap();

        let tail = drain(&log, "tail", "c").await;
        let head = drain(&log, "head", "c").await;

        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].envelope.payload, json!({ "id": 2 }));
        assert_eq!(head.len(), 2);
    }

    #[tokio::test]
    async fn consumers_in_one_group_split_entries() {
        let log = MemoryLog::new();
        log.create_group("s", "shared", StartPosition::Tail).await.unwrap();
        for n in 0..4 {
            log.append("s", &envelope(n)).await.unwrap();
        }

        let first = log
            .read_group("s", "shared", "a", ReadCursor::New, 2, Duration::ZERO)
            .await
            .unwrap();
        let second = log
            .read_group("s", "shared", "b", ReadCursor::New, 2, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert!(first.iter().all(|a| second.iter().all(|b| a.id != b.id)));
    }

    #[tokio::test]
    async fn pending_entries_survive_until_acknowledged() {
        let log = MemoryLog::new();
        log.create_group("s", "g", StartPosition::Tail).await.unwrap();
        log.append("s", &envelope(1)).await.unwrap();

        let delivered = drain(&log, "g", "c").await;
        let pending = log
            .read_group("s", "g", "c", ReadCursor::Pending { after: None }, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(pending, delivered);
        assert_eq!(log.info("s").await.unwrap().groups[0].pending, 1);

        let acked = log.ack("s", "g", &[delivered[0].id]).await.unwrap();
        assert_eq!(acked, 1);
        assert_eq!(log.info("s").await.unwrap().groups[0].pending, 0);
        assert_eq!(log.ack("s", "g", &[delivered[0].id]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pending_reads_resume_after_the_given_id() {
        let log = MemoryLog::new();
        log.create_group("s", "g", StartPosition::Tail).await.unwrap();
        for n in 0..3 {
            log.append("s", &envelope(n)).await.unwrap();
        }
        let delivered = drain(&log, "g", "c").await;

        let mut walked = Vec::new();
        let mut after = None;
        loop {
            let batch = log
                .read_group("s", "g", "c", ReadCursor::Pending { after }, 1, Duration::ZERO)
                .await
                .unwrap();
            let Some(last) = batch.last() else { break };
            after = Some(last.id);
            walked.extend(batch);
        }

        assert_eq!(walked, delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_read_times_out_empty() {
        let log = MemoryLog::new();
        log.create_group("s", "g", StartPosition::Tail).await.unwrap();

        let started = Instant::now();
        let batch = log
            .read_group("s", "g", "c", ReadCursor::New, 10, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let log = std::sync::Arc::new(MemoryLog::new());
        log.create_group("s", "g", StartPosition::Tail).await.unwrap();

        let reader = {
            let log = log.clone();
            tokio::spawn(async move {
                log.read_group("s", "g", "c", ReadCursor::New, 10, Duration::from_secs(30))
                    .await
            })
        };

        tokio::task::yield_now().await;
        log.append("s", &envelope(7)).await.unwrap();

        let batch = reader.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].envelope.payload, json!({ "id": 7 }));
    }

    #[tokio::test]
    async fn reading_a_missing_group_fails() {
        let log = MemoryLog::new();
        log.append("s", &envelope(1)).await.unwrap();

        let err = drain_err(&log).await;
        assert_eq!(err.error_kind, ErrorKind::GroupNotFound);
    }

    async fn drain_err(log: &MemoryLog) -> Error {
        log.read_group("s", "nope", "c", ReadCursor::New, 1, Duration::ZERO)
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn trim_drops_oldest_entries_but_keeps_ids_increasing() {
        let log = MemoryLog::new();
        let mut last = None;
        for n in 0..5 {
            last = Some(log.append("s", &envelope(n)).await.unwrap());
        }

        assert_eq!(log.trim("s", 2).await.unwrap(), 3);
        assert_eq!(log.info("s").await.unwrap().length, 2);
        assert_eq!(log.trim("s", 0).await.unwrap(), 2);

        let next = log.append("s", &envelope(9)).await.unwrap();
        assert!(Some(next) > last);
    }

    #[tokio::test]
    async fn destroy_group_reports_whether_it_existed() {
        let log = MemoryLog::new();
        log.create_group("s", "g", StartPosition::Tail).await.unwrap();

        assert!(log.destroy_group("s", "g").await.unwrap());
        assert!(!log.destroy_group("s", "g").await.unwrap());
        assert!(log.info("s").await.unwrap().groups.is_empty());
    }
}
