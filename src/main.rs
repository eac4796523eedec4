use log::*;
use service::{config::Config, init_event_log, logging::Logger, AppState};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start the logger: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        "Starting up in {} mode, log level {}",
        config.runtime_env(),
        config.log_level_filter
    );

    let event_log = match init_event_log(&config).await {
        Ok(event_log) => event_log,
        Err(e) => {
            error!("Failed to connect to the event log: {e}");
            return ExitCode::FAILURE;
        }
    };

    let app_state = AppState::new(config, event_log);

    match web::init_server(app_state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server error: {e}");
            ExitCode::FAILURE
        }
    }
}
