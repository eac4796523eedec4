use anyhow::Result;
use clap::Parser;
use colored::*;
use serde_json::Value;
use sse_client::{ConnectionState, EventSourceBuilder, HttpTransport, MessageEvent, ReconnectPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Parser)]
#[command(name = "sse-client")]
#[command(about = "Follow a server-sent event stream")]
struct Cli {
    /// Event stream URL (e.g., http://localhost:4000/sse)
    #[arg(long, env = "SSE_URL", default_value = "http://localhost:4000/sse")]
    url: String,

    /// Tenant scope sent as the X-Stream-Scope header
    #[arg(long)]
    scope: Option<String>,

    /// Base reconnect delay in milliseconds
    #[arg(long, default_value_t = 1000)]
    base_delay_ms: u64,

    /// Reconnect delay cap in milliseconds
    #[arg(long, default_value_t = 30000)]
    max_delay_ms: u64,

    /// Reconnect attempts before giving up
    #[arg(long, default_value_t = 10)]
    max_attempts: u32,

    /// Force a reconnect after this many seconds without any frame
    #[arg(long, default_value_t = 30)]
    staleness_secs: u64,

    /// Also print heartbeat events
    #[arg(long)]
    show_heartbeats: bool,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let mut transport = HttpTransport::new(&cli.url);
    if let Some(scope) = &cli.scope {
        transport = transport.with_scope(scope);
    }

    let failed = Arc::new(Notify::new());
    let on_failed = failed.clone();
    let show_heartbeats = cli.show_heartbeats;

    let mut source = EventSourceBuilder::new(transport)
        .reconnect_policy(ReconnectPolicy {
            base_delay: Duration::from_millis(cli.base_delay_ms),
            max_delay: Duration::from_millis(cli.max_delay_ms),
            max_attempts: cli.max_attempts,
        })
        .staleness_threshold(Duration::from_secs(cli.staleness_secs))
        .on("ping", move |event| {
            if show_heartbeats {
                println!("{} {}", "♥".bright_black(), event.data.bright_black());
            }
        })
        .on_message(print_event)
        .on_state(move |state| {
            print_state(state);
            if *state == ConnectionState::Failed {
                on_failed.notify_one();
            }
        })
        .build();

    println!("{} Connecting to {}", "→".blue(), cli.url);
    source.connect();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("\n{} Interrupted", "→".blue()),
        _ = failed.notified() => {}
    }

    source.disconnect();

    if let Some(id) = source.last_event_id() {
        println!("{} Last event id: {}", "→".blue(), id);
    }

    Ok(())
}

fn print_event(event: &MessageEvent) {
    let data = match serde_json::from_str::<Value>(&event.data) {
        Ok(json) => serde_json::to_string_pretty(&json).unwrap_or_else(|_| event.data.clone()),
        Err(_) => event.data.clone(),
    };

    println!(
        "{} {} {}",
        event.event_type.cyan().bold(),
        event.id.as_deref().unwrap_or("-").bright_black(),
        data
    );
}

fn print_state(state: &ConnectionState) {
    match state {
        ConnectionState::Connected => println!("{} {}", "✓".green(), state),
        ConnectionState::Reconnecting { .. } | ConnectionState::Disconnected => {
            println!("{} {}", "→".yellow(), state)
        }
        ConnectionState::Error(_) => println!("{} {}", "✗".red(), state),
        ConnectionState::Failed => println!("{} {}", "✗".red().bold(), state.to_string().red()),
    }
}
