use async_stream::stream;
use async_trait::async_trait;
use axum::response::sse::{Event, Sse};
use futures_util::Stream;
use std::convert::Infallible;
use std::fmt;
use tokio::sync::mpsc;

/// The transport went away; treated as an ordinary disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "client disconnected")
    }
}

impl std::error::Error for SinkClosed {}

/// Outbound side of one SSE connection.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Hands one frame to the transport. Blocks while the client is not
    /// keeping up. How far the frame has travelled when this returns is up to
    /// the implementation; see [`ChannelSink`].
    async fn send(&mut self, frame: Event) -> Result<(), SinkClosed>;

    /// Resolves once the client has gone away.
    async fn closed(&self);
}

/// Sink feeding an HTTP response body through a one-slot channel.
///
/// A completed `send` means the frame sits in the slot and every earlier frame
/// has been taken by the response body. Whether hyper has flushed those bytes
/// to the socket is not observable from here, so "written" for this sink means
/// "handed to the body".
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

/// Body side of a [`ChannelSink`].
pub type FrameReceiver = mpsc::Receiver<Event>;

pub fn channel() -> (ChannelSink, FrameReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (ChannelSink { tx }, rx)
}

/// Wraps the body side of a channel into an SSE response. No keep-alive is
/// configured: the session writes its own heartbeats.
///
/// Dropping the response (client gone) drops the receiver, which fires
/// [`FrameSink::closed`] on the sending side.
pub fn into_sse(mut frames: FrameReceiver) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = stream! {
        while let Some(frame) = frames.recv().await {
            yield Ok::<_, Infallible>(frame);
        }
    };

    Sse::new(stream)
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Event) -> Result<(), SinkClosed> {
        self.tx.send(frame).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}
