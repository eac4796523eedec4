use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use sse::{HeartbeatStyle, SessionConfig};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Header naming the tenant scope of a stream.
pub const STREAM_SCOPE_HEADER: &str = "x-stream-scope";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// Redis URL of the event log. Without one, events live in process memory
    /// and are lost on restart.
    #[arg(short, long, env)]
    redis_url: Option<String>,

    /// Name of the stream domain events are appended to
    #[arg(long, env, default_value = "events")]
    stream_key: String,

    /// Prefix of the per-connection consumer group names
    #[arg(long, env, default_value = "sse")]
    group_prefix: String,

    /// Longest a session blocks on the log before sending a heartbeat
    #[arg(long, env, default_value_t = 5000)]
    pub read_block_ms: u64,

    /// Maximum entries a session reads at once
    #[arg(long, env, default_value_t = 32)]
    pub batch_size: usize,

    /// Heartbeat frame sent to idle connections: a `ping` event or a comment line
    #[arg(long, env, default_value_t = HeartbeatStyle::Event)]
    pub heartbeat_style: HeartbeatStyle,

    /// Seconds a write to a client may block before the connection is closed
    #[arg(long, env, default_value_t = 30)]
    pub max_write_block_secs: u64,

    /// Reconnect delay in milliseconds advertised to clients
    #[arg(long, env, default_value_t = 1000)]
    pub retry_hint_ms: u64,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref()
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn group_prefix(&self) -> &str {
        &self.group_prefix
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            read_block: Duration::from_millis(self.read_block_ms),
            batch_size: self.batch_size.max(1),
            heartbeat: self.heartbeat_style,
            max_write_block: Duration::from_secs(self.max_write_block_secs),
            retry_hint: Duration::from_millis(self.retry_hint_ms),
        }
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_an_in_memory_development_server() {
        let config = Config::parse_from(["livefeed"]);

        assert_eq!(config.redis_url(), None);
        assert_eq!(config.stream_key(), "events");
        assert_eq!(config.group_prefix(), "sse");
        assert_eq!(config.port, 4000);
        assert!(!config.is_production());
    }

    #[test]
    fn session_config_follows_the_flags() {
        let config = Config::parse_from([
            "livefeed",
            "--read-block-ms",
            "250",
            "--batch-size",
            "0",
            "--heartbeat-style",
            "comment",
            "--max-write-block-secs",
            "3",
            "--retry-hint-ms",
            "1500",
        ]);

        let session = config.session_config();
        assert_eq!(session.read_block, Duration::from_millis(250));
        assert_eq!(session.batch_size, 1);
        assert_eq!(session.heartbeat, HeartbeatStyle::Comment);
        assert_eq!(session.max_write_block, Duration::from_secs(3));
        assert_eq!(session.retry_hint, Duration::from_millis(1500));
    }

    #[test]
    fn rejects_unknown_heartbeat_styles() {
        assert!(Config::try_parse_from(["livefeed", "--heartbeat-style", "bell"]).is_err());
    }

    #[test]
    fn runtime_env_parses_case_insensitively() {
        assert_eq!("PRODUCTION".parse::<RustEnv>(), Ok(RustEnv::Production));
        assert_eq!("staging".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!("qa".parse::<RustEnv>(), Err(RustEnvParseError));
    }
}
