//! Incremental parser for the `text/event-stream` format.
//!
//! The parser is a pure state machine over byte chunks of any length. Lines
//! and frames may be split anywhere, including inside a multi-byte UTF-8
//! character; the partial line and the in-progress frame carry over to the
//! next [`SseParser::push`].

use std::fmt;
use std::time::Duration;

/// Default upper bound for one frame (all of its lines together).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

const DEFAULT_EVENT_TYPE: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub event_type: String,
    pub data: String,
    /// The last event id seen on the stream when this event was dispatched.
    pub id: Option<String>,
}

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    InvalidUtf8,
    TooLarge,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::InvalidUtf8 => write!(f, "frame contains invalid UTF-8"),
            FrameError::TooLarge => write!(f, "frame exceeds the maximum size"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Event(MessageEvent),
    Comment(String),
    /// The server changed the base reconnect delay.
    Retry(Duration),
    Discarded(FrameError),
}

#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    event_type: Option<String>,
    data: String,
    last_event_id: Option<String>,
    frame_size: usize,
    max_frame_size: usize,
    corrupt: Option<FrameError>,
    // Set while dropping the rest of an oversized line.
    skip_line: bool,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event_type: None,
            data: String::new(),
            last_event_id: None,
            frame_size: 0,
            max_frame_size,
            corrupt: None,
            skip_line: false,
        }
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Drops any partial line and in-progress frame. The last event id
    /// survives, it is what a reconnect resumes from.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.skip_line = false;
        self.reset_frame();
    }

    /// Feeds one chunk and returns everything it completed, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ParseOutcome> {
        let mut outcomes = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.skip_line {
                self.skip_line = false;
                self.buffer.clear();
                continue;
            }

            let mut line = std::mem::take(&mut self.buffer);
            line.extend_from_slice(head);
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if let Some(outcome) = self.process_line(&line) {
                outcomes.push(outcome);
            }
        }

        if !self.skip_line {
            self.buffer.extend_from_slice(rest);
            if self.frame_size + self.buffer.len() > self.max_frame_size {
                self.buffer.clear();
                self.skip_line = true;
                self.corrupt = Some(FrameError::TooLarge);
                self.data.clear();
            }
        }

        outcomes
    }

    fn process_line(&mut self, line: &[u8]) -> Option<ParseOutcome> {
        if line.is_empty() {
            return self.dispatch();
        }

        self.frame_size += line.len() + 1;
        if self.frame_size > self.max_frame_size {
            self.corrupt = Some(FrameError::TooLarge);
            self.data.clear();
        }
        if self.corrupt.is_some() {
            return None;
        }

        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(_) => {
                self.corrupt = Some(FrameError::InvalidUtf8);
                self.data.clear();
                return None;
            }
        };

        if let Some(comment) = line.strip_prefix(':') {
            return Some(ParseOutcome::Comment(strip_leading_space(comment).to_string()));
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, strip_leading_space(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" if !value.contains('\0') => {
                self.last_event_id = (!value.is_empty()).then(|| value.to_string());
            }
            "retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                if let Ok(ms) = value.parse::<u64>() {
                    return Some(ParseOutcome::Retry(Duration::from_millis(ms)));
                }
            }
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<ParseOutcome> {
        if let Some(error) = self.corrupt {
            self.reset_frame();
            return Some(ParseOutcome::Discarded(error));
        }

        if self.data.is_empty() {
            self.reset_frame();
            return None;
        }

        let mut data = std::mem::take(&mut self.data);
        data.pop();
        let event_type = self
            .event_type
            .take()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());
        self.reset_frame();

        Some(ParseOutcome::Event(MessageEvent {
            event_type,
            data,
            id: self.last_event_id.clone(),
        }))
    }

    fn reset_frame(&mut self) {
        self.event_type = None;
        self.data.clear();
        self.frame_size = 0;
        self.corrupt = None;
    }
}

fn strip_leading_space(value: &str) -> &str {
    value.strip_prefix(' ').unwrap_or(value)
}
