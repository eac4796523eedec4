use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ErrorKind};

/// Log-assigned identifier of an appended entry: a millisecond timestamp plus a
/// sequence number within that millisecond. Ordering by `EntryId` is log
/// append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Returns the id that follows `previous` for an append at wall clock `now_ms`.
    /// Never goes backwards, even if the clock does.
    pub fn next_after(previous: Option<EntryId>, now_ms: u64) -> Self {
        match previous {
            Some(prev) if now_ms <= prev.ms => Self::new(prev.ms, prev.seq + 1),
            _ => Self::new(now_ms, 0),
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::new(ErrorKind::InvalidEntryId(s.to_string()));

        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };

        Ok(Self {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// The unit appended to the log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Builds an envelope stamped with the current time.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            emitted_at: Utc::now(),
        }
    }
}

/// An envelope together with the id the log assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: EntryId,
    pub envelope: EventEnvelope,
}
