use config::Config;
use eventlog::{ConsumerGroupManager, Error, EventLog, MemoryLog, RedisLog};
use events::EventPublisher;
use log::{info, warn};
use sse::ConnectionRegistry;
use std::sync::Arc;

pub mod config;
pub mod logging;

/// Connects the configured event log: Redis Streams when a Redis URL is set,
/// process memory otherwise.
pub async fn init_event_log(config: &Config) -> Result<Arc<dyn EventLog>, Error> {
    match config.redis_url() {
        Some(url) => {
            info!("Event log: Redis Streams, stream {}", config.stream_key());
            let log = RedisLog::connect(url).await?;
            Ok(Arc::new(log))
        }
        None => {
            if config.is_production() {
                warn!("No Redis URL configured, events will not survive a restart");
            }
            info!("Event log: in memory, stream {}", config.stream_key());
            Ok(Arc::new(MemoryLog::new()))
        }
    }
}

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub publisher: EventPublisher,
    pub consumer_groups: Arc<ConsumerGroupManager>,
    pub connections: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(app_config: Config, event_log: Arc<dyn EventLog>) -> Self {
        let publisher = EventPublisher::new(event_log.clone(), app_config.stream_key());
        let consumer_groups = Arc::new(ConsumerGroupManager::new(
            event_log,
            app_config.group_prefix(),
        ));

        Self {
            config: app_config,
            publisher,
            consumer_groups,
            connections: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Stream name for an optional tenant scope.
    pub fn stream_for(&self, scope: Option<&str>) -> Result<String, Error> {
        eventlog::scoped_stream(self.config.stream_key(), scope)
    }
}
