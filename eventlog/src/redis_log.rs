use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::*;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamId, StreamInfoGroupsReply, StreamInfoStreamReply, StreamMaxlen, StreamReadOptions,
    StreamReadReply,
};
use redis::AsyncCommands;
use std::time::Duration;

use crate::entry::{EntryId, EventEnvelope, LogEntry};
use crate::error::{Error, ErrorKind};
use crate::{EventLog, GroupInfo, ReadCursor, StartPosition, StreamInfo};

const FIELD_TYPE: &str = "type";
const FIELD_PAYLOAD: &str = "payload";
const FIELD_EMITTED_AT: &str = "emitted_at";

/// Id understood by XGROUP CREATE as "only entries added from now on".
const STREAM_ID_TAIL: &str = "$";
/// Id understood by XGROUP CREATE as "everything in the stream".
const STREAM_ID_HEAD: &str = "0";
/// Id understood by XREADGROUP as "never delivered to this group".
const STREAM_ID_ADDITIONS: &str = ">";
/// Id understood by XREADGROUP as "this consumer's pending entries".
const STREAM_ID_PENDING: &str = "0";

/// XREADGROUP with an explicit id returns pending entries strictly after it.
fn pending_start(after: Option<EntryId>) -> String {
    after.map_or_else(|| STREAM_ID_PENDING.to_string(), |id| id.to_string())
}

/// [`EventLog`] backed by [Redis Streams](https://redis.io/docs/data-types/streams/).
///
/// Blocking `XREADGROUP` calls would stall every other command pipelined on the
/// same connection, so each consumer gets a dedicated reader connection. All
/// non-blocking commands share one multiplexed connection.
pub struct RedisLog {
    client: redis::Client,
    shared: MultiplexedConnection,
    readers: DashMap<String, MultiplexedConnection>,
}

impl RedisLog {
    /// Connects to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url)?;
        let shared = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            client,
            shared,
            readers: DashMap::new(),
        })
    }

    async fn reader(&self, key: &str) -> Result<MultiplexedConnection, Error> {
        let cached = self.readers.get(key).map(|con| con.clone());
        if let Some(con) = cached {
            return Ok(con);
        }

        let con = self.client.get_multiplexed_async_connection().await?;
        self.readers.insert(key.to_string(), con.clone());
        debug!("Opened dedicated stream reader connection for {key}");

        Ok(con)
    }
}

fn reader_key(stream: &str, group: &str, consumer: &str) -> String {
    format!("{stream}/{group}/{consumer}")
}

fn encode_fields(envelope: &EventEnvelope) -> Result<[(&'static str, String); 3], Error> {
    Ok([
        (FIELD_TYPE, envelope.event_type.clone()),
        (FIELD_PAYLOAD, serde_json::to_string(&envelope.payload)?),
        (FIELD_EMITTED_AT, envelope.emitted_at.to_rfc3339()),
    ])
}

fn decode_entry(entry: &StreamId) -> Result<LogEntry, Error> {
    let missing = || Error::new(ErrorKind::Encoding);

    let event_type: String = entry.get(FIELD_TYPE).ok_or_else(missing)?;
    let payload: String = entry.get(FIELD_PAYLOAD).ok_or_else(missing)?;
    let emitted_at: String = entry.get(FIELD_EMITTED_AT).ok_or_else(missing)?;

    Ok(LogEntry {
        id: entry.id.parse()?,
        envelope: EventEnvelope {
            event_type,
            payload: serde_json::from_str(&payload)?,
            emitted_at: DateTime::parse_from_rfc3339(&emitted_at)?.with_timezone(&Utc),
        },
    })
}

fn is_missing_stream(err: &redis::RedisError) -> bool {
    err.to_string().contains("no such key")
}

#[async_trait]
impl EventLog for RedisLog {
    async fn append(&self, stream: &str, envelope: &EventEnvelope) -> Result<EntryId, Error> {
        let mut con = self.shared.clone();
        let fields = encode_fields(envelope)?;

        let id: String = con.xadd(stream, "*", &fields).await?;
        id.parse()
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), Error> {
        let start_id = match start {
            StartPosition::Tail => STREAM_ID_TAIL,
            StartPosition::Head => STREAM_ID_HEAD,
        };

        let mut con = self.shared.clone();
        con.xgroup_create_mkstream::<_, _, _, ()>(stream, group, start_id)
            .await?;

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
        let mut options = StreamReadOptions::default().group(group, consumer).count(count);

        let mut pending = match cursor {
            ReadCursor::Pending { after } => Some(after),
            ReadCursor::New => {
                if !block.is_zero() {
                    let block_ms = usize::try_from(block.as_millis()).unwrap_or(usize::MAX);
                    options = options.block(block_ms);
                }
                None
            }
        };

        let mut con = self.reader(&reader_key(stream, group, consumer)).await?;

        loop {
            let id = match pending {
                Some(after) => pending_start(after),
                None => STREAM_ID_ADDITIONS.to_string(),
            };
            let reply: Option<StreamReadReply> =
                con.xread_options(&[stream], &[id], &options).await?;

            let Some(reply) = reply else {
                return Ok(Vec::new());
            };

            let mut entries = Vec::new();
            let mut poisoned = Vec::new();

            for key in reply.keys {
                for entry in key.ids {
                    match decode_entry(&entry) {
                        Ok(decoded) => entries.push(decoded),
                        Err(e) => {
                            warn!("Dropping undecodable entry {} from {stream}: {e}", entry.id);
                            poisoned.push(entry.id);
                        }
                    }
                }
            }

            // An entry that can never be decoded would otherwise sit in the
            // pending set forever.
            let last_poisoned = poisoned.last().and_then(|id| id.parse::<EntryId>().ok());
            if !poisoned.is_empty() {
                let mut con = self.shared.clone();
                con.xack::<_, _, _, ()>(stream, group, &poisoned).await?;
            }

            // A pending batch made only of dropped entries is not the end of
            // the pending set; keep walking past it.
            match (pending, last_poisoned) {
                (Some(_), Some(last)) if entries.is_empty() => pending = Some(Some(last)),
                _ => return Ok(entries),
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize, Error> {
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let mut con = self.shared.clone();

        Ok(con.xack(stream, group, &ids).await?)
    }

    async fn info(&self, stream: &str) -> Result<StreamInfo, Error> {
        let mut con = self.shared.clone();

        let summary: StreamInfoStreamReply = match con.xinfo_stream(stream).await {
            Ok(summary) => summary,
            Err(e) if is_missing_stream(&e) => return Ok(StreamInfo::default()),
            Err(e) => return Err(e.into()),
        };
        let groups: StreamInfoGroupsReply = con.xinfo_groups(stream).await?;

        Ok(StreamInfo {
            length: summary.length,
            groups: groups
                .groups
                .into_iter()
                .map(|group| GroupInfo {
                    last_delivered_id: group.last_delivered_id.parse().ok(),
                    name: group.name,
                    consumers: group.consumers,
                    pending: group.pending,
                })
                .collect(),
        })
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool, Error> {
        let mut con = self.shared.clone();

        match con.xgroup_destroy::<_, _, bool>(stream, group).await {
            Ok(destroyed) => Ok(destroyed),
            Err(e) if is_missing_stream(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn trim(&self, stream: &str, max_len: usize) -> Result<usize, Error> {
        let mut con = self.shared.clone();
        Ok(con.xtrim(stream, StreamMaxlen::Equals(max_len)).await?)
    }

    async fn release_consumer(&self, stream: &str, group: &str, consumer: &str) {
        if self
            .readers
            .remove(&reader_key(stream, group, consumer))
            .is_some()
        {
            debug!("Released stream reader connection for {stream}/{group}/{consumer}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;
    use serde_json::json;
    use std::collections::HashMap;

    fn stream_id(id: &str, fields: &[(&str, &str)]) -> StreamId {
        StreamId {
            id: id.to_string(),
            map: fields
                .iter()
                .map(|(k, v)| (k.to_string(), Value::Data(v.as_bytes().to_vec())))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn decodes_the_fields_written_by_append() {
        let envelope = EventEnvelope::new("x.updated", json!({ "id": 1, "field": "v" }));
        let fields = encode_fields(&envelope).unwrap();
        let pairs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let decoded = decode_entry(&stream_id("1700000000000-0", &pairs)).unwrap();

        assert_eq!(decoded.id, EntryId::new(1_700_000_000_000, 0));
        assert_eq!(decoded.envelope.event_type, "x.updated");
        assert_eq!(decoded.envelope.payload, json!({ "id": 1, "field": "v" }));
        assert_eq!(
            decoded.envelope.emitted_at.timestamp_millis(),
            envelope.emitted_at.timestamp_millis()
        );
    }

    #[test]
    fn entries_missing_fields_are_encoding_errors() {
        let err = decode_entry(&stream_id("1-0", &[(FIELD_TYPE, "x.created")])).unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Encoding);
    }

    #[test]
    fn pending_reads_start_after_the_cursor() {
        assert_eq!(pending_start(None), "0");
        assert_eq!(pending_start(Some(EntryId::new(1_700_000_000_000, 3))), "1700000000000-3");
    }

    #[test]
    fn reader_keys_are_unique_per_consumer() {
        assert_ne!(reader_key("s", "g1", "c"), reader_key("s", "g2", "c"));
    }
}
