use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Crates of this workspace, matched as target prefixes. Below `TRACE` only
/// their records are printed; redis, hyper, axum and the rest of the stack
/// speak up only when tracing.
const WORKSPACE_CRATES: &[&str] = &["livefeed", "eventlog", "events", "sse", "service", "web"];

pub struct Logger {}

impl Logger {
    /// Installs the global terminal logger at the configured level.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        TermLogger::init(
            config.log_level_filter,
            Self::build_log_config(config.log_level_filter),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
    }

    fn build_log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        if level != LevelFilter::Trace {
            for krate in WORKSPACE_CRATES {
                builder.add_filter_allow_str(krate);
            }
        }

        builder.build()
    }
}
