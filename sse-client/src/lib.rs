//! Client side of the event stream.
//!
//! - [`SseParser`] turns arbitrary byte chunks into events, comments and
//!   retry hints. It knows nothing about the network.
//! - [`Transport`] opens a connection and yields byte chunks;
//!   [`HttpTransport`] does so over HTTP.
//! - [`EventSource`] ties them together: it dispatches events to handlers,
//!   reconnects with exponential backoff, forces a reconnect when the stream
//!   goes silent, and reports [`ConnectionState`] transitions to observers.

pub mod backoff;
pub mod client;
pub mod error;
pub mod parser;
pub mod state;
pub mod transport;
pub mod watchdog;

pub use backoff::{Backoff, ReconnectPolicy};
pub use client::{EventHandler, EventSource, EventSourceBuilder, DEFAULT_STALENESS_THRESHOLD};
pub use error::{Error, ErrorKind};
pub use parser::{FrameError, MessageEvent, ParseOutcome, SseParser};
pub use state::{ConnectionState, StateObserver};
pub use transport::{ByteStream, HttpTransport, Transport, STREAM_SCOPE_HEADER};
pub use watchdog::Staleness;
