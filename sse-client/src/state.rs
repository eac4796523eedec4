use std::fmt;
use std::time::Duration;

/// Connection lifecycle as seen by application code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    Disconnected,
    Error(String),
    /// Reconnect attempts are exhausted. Terminal until `connect()` is called
    /// again.
    Failed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error(_) => "error",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt} in {delay:?})")
            }
            ConnectionState::Error(message) => write!(f, "error: {message}"),
            state => f.write_str(state.name()),
        }
    }
}

pub type StateObserver = Box<dyn Fn(&ConnectionState) + Send + Sync>;
