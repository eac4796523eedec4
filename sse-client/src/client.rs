use futures_util::StreamExt;
use log::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::backoff::{Backoff, ReconnectPolicy};
use crate::error::Error;
use crate::parser::{MessageEvent, ParseOutcome, SseParser, DEFAULT_MAX_FRAME_SIZE};
use crate::state::{ConnectionState, StateObserver};
use crate::transport::{ByteStream, Transport};
use crate::watchdog::Staleness;

pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(30);

pub type EventHandler = Box<dyn Fn(&MessageEvent) + Send + Sync>;

pub struct EventSourceBuilder {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    staleness_threshold: Duration,
    max_frame_size: usize,
    handlers: HashMap<String, EventHandler>,
    fallback: Option<EventHandler>,
    observers: Vec<StateObserver>,
}

impl EventSourceBuilder {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            policy: ReconnectPolicy::default(),
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handlers: HashMap::new(),
            fallback: None,
            observers: Vec::new(),
        }
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Handles events of one type.
    pub fn on<F>(mut self, event_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.handlers.insert(event_type.into(), Box::new(handler));
        self
    }

    /// Handles events no type-specific handler claimed.
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(handler));
        self
    }

    pub fn on_state<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn build(self) -> EventSource {
        EventSource {
            shared: Arc::new(Shared {
                transport: self.transport,
                policy: self.policy,
                staleness_threshold: self.staleness_threshold,
                max_frame_size: self.max_frame_size,
                handlers: self.handlers,
                fallback: self.fallback,
                observers: self.observers,
                last_event_id: Mutex::new(None),
            }),
            task: None,
        }
    }
}

/// A reconnecting SSE client.
///
/// Handlers and observers belong to this handle and go away with it. Parser
/// state and timers live inside the connection task and are never shared.
pub struct EventSource {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl EventSource {
    /// Starts the connection task. A no-op while it is running; restarts the
    /// client after it reached [`ConnectionState::Failed`].
    pub fn connect(&mut self) {
        if self.is_running() {
            return;
        }
        self.task = Some(tokio::spawn(run(self.shared.clone())));
    }

    /// Stops the connection task and any pending reconnect. Safe to call any
    /// number of times.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            let was_running = !task.is_finished();
            task.abort();
            if was_running {
                self.shared.notify(&ConnectionState::Disconnected);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.shared.last_event_id()
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    staleness_threshold: Duration,
    max_frame_size: usize,
    handlers: HashMap<String, EventHandler>,
    fallback: Option<EventHandler>,
    observers: Vec<StateObserver>,
    last_event_id: Mutex<Option<String>>,
}

impl Shared {
    fn notify(&self, state: &ConnectionState) {
        debug!("Event stream {state}");
        for observer in &self.observers {
            observer(state);
        }
    }

    fn last_event_id(&self) -> Option<String> {
        self.last_event_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn handle(&self, outcome: ParseOutcome, backoff: &mut Backoff) {
        match outcome {
            ParseOutcome::Event(event) => {
                if event.id.is_some() {
                    *self
                        .last_event_id
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = event.id.clone();
                }

                match self.handlers.get(&event.event_type).or(self.fallback.as_ref()) {
                    Some(handler) => handler(&event),
                    None => trace!("No handler for {} event", event.event_type),
                }
            }
            ParseOutcome::Comment(comment) => trace!("Comment: {comment}"),
            ParseOutcome::Retry(delay) => backoff.set_base_delay(delay),
            ParseOutcome::Discarded(reason) => warn!("Discarded a frame: {reason}"),
        }
    }
}

enum StreamEnd {
    Closed,
    Broken(Error),
    Stale(Duration),
}

async fn run(shared: Arc<Shared>) {
    let mut backoff = Backoff::new(shared.policy.clone());
    let mut parser = SseParser::with_max_frame_size(shared.max_frame_size);

    loop {
        let last_event_id = shared.last_event_id();

        match shared.transport.open(last_event_id.as_deref()).await {
            Ok(stream) => {
                backoff.reset();
                shared.notify(&ConnectionState::Connected);

                let end = consume(&shared, stream, &mut parser, &mut backoff).await;
                parser.reset();

                match end {
                    StreamEnd::Closed => shared.notify(&ConnectionState::Disconnected),
                    StreamEnd::Broken(e) => {
                        warn!("Event stream broke: {e}");
                        shared.notify(&ConnectionState::Error(e.to_string()));
                    }
                    StreamEnd::Stale(threshold) => {
                        warn!("No frames for {threshold:?}, forcing a reconnect");
                        shared.notify(&ConnectionState::Error(format!(
                            "no frames received for {threshold:?}"
                        )));
                    }
                }
            }
            Err(e) => {
                warn!("Failed to open event stream: {e}");
                shared.notify(&ConnectionState::Error(e.to_string()));
            }
        }

        match backoff.next_delay() {
            Some(delay) => {
                shared.notify(&ConnectionState::Reconnecting {
                    attempt: backoff.attempt(),
                    delay,
                });
                tokio::time::sleep(delay).await;
            }
            None => {
                error!(
                    "Giving up on the event stream after {} reconnect attempts",
                    backoff.attempt()
                );
                shared.notify(&ConnectionState::Failed);
                return;
            }
        }
    }
}

async fn consume(
    shared: &Shared,
    mut stream: ByteStream,
    parser: &mut SseParser,
    backoff: &mut Backoff,
) -> StreamEnd {
    let mut staleness = Staleness::new(shared.staleness_threshold, Instant::now());
    let mut ticks = tokio::time::interval(staleness.check_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticks.tick().await;

    loop {
        tokio::select! {
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    let outcomes = parser.push(&bytes);
                    if !outcomes.is_empty() {
                        staleness.touch(Instant::now());
                    }
                    for outcome in outcomes {
                        shared.handle(outcome, backoff);
                    }
                }
                Some(Err(e)) => return StreamEnd::Broken(e),
                None => return StreamEnd::Closed,
            },
            _ = ticks.tick() => {
                if staleness.is_stale(Instant::now()) {
                    return StreamEnd::Stale(staleness.threshold());
                }
            }
        }
    }
}
