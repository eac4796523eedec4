//! Server-Sent Events (SSE) sessions fed from a durable event log.
//!
//! # Architecture
//!
//! - **One consumer group per connection**: every connection opens its own
//!   consumer group at the tail of the stream, so every connection observes
//!   every event appended after it connected, in log order.
//! - **Ack after write**: an entry leaves the connection's pending set only
//!   after its frame was accepted by the sink. For the HTTP body that means
//!   handed to hyper; the socket flush itself is not observed.
//! - **Bounded writes**: a client that stops reading is force-closed after
//!   `max_write_block`; slow clients never stall other sessions.
//! - **Heartbeats**: idle connections get a `ping` event (or a comment line)
//!   every `read_block`.
//!
//! # Message Flow
//!
//! 1. A client opens `GET /sse`
//! 2. [`Session::open`] creates the connection's consumer identity and
//!    registers it in the [`ConnectionRegistry`]
//! 3. [`Session::run`] writes the preamble, then loops: read from the group,
//!    write each entry as a frame, acknowledge it
//! 4. When the client goes away or a write times out, the session unregisters
//!    and releases its consumer group
//!
//! # Modules
//!
//! - `connection`: ConnectionRegistry indexed by connection and by stream
//! - `frame`: the frames a session writes, as axum SSE events
//! - `session`: the per-connection state machine
//! - `sink`: where frames are written

pub mod connection;
pub mod frame;
pub mod session;
pub mod sink;

pub use connection::{ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use frame::PING_EVENT;
pub use session::{
    HeartbeatStyle, HeartbeatStyleParseError, Session, SessionConfig, SessionEnd,
    SessionOutcome, SessionState,
};
pub use sink::{channel, into_sse, ChannelSink, FrameReceiver, FrameSink, SinkClosed};
