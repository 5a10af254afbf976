//! CLI for stompchat
//!
//! Subcommands:
//! - `server`: run the in-memory chat broker
//! - `client`: run the scripted chat session against a broker

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use stompchat::broker::Broker;
use stompchat::client::{LoggingObserver, TestClient};
use stompchat::config::{Settings, load_config};
use stompchat::stomp::ConnectionStatus;
use stompchat::transport::start_websocket_server;
use stompchat::utils::logging;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "stompchat")]
enum Command {
    /// Start the in-memory chat broker
    Server,
    /// Connect, follow a channel and send messages on a timer
    Client {
        /// Chat endpoint (default: from config, ws://localhost:8080/ws/chat)
        #[arg(long)]
        url: Option<String>,
        /// Channel to subscribe and send to
        #[arg(long)]
        channel: Option<u64>,
        /// First message sent after subscribing
        #[arg(long)]
        message: Option<String>,
        /// Delay between automatic messages
        #[arg(long)]
        interval_ms: Option<u64>,
        /// How long to stay connected
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cmd = Command::parse();
    let mut config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return;
        }
    };
    logging::init(&config.logging.level);

    match cmd {
        Command::Server => {
            if let Err(e) = run_server(&config).await {
                error!("Server failed: {e}");
            }
        }
        Command::Client {
            url,
            channel,
            message,
            interval_ms,
            duration_secs,
        } => {
            if let Some(url) = url {
                config.client.url = url;
            }
            let session = &mut config.session;
            session.channel_id = channel.unwrap_or(session.channel_id);
            if let Some(message) = message {
                session.message = message;
            }
            session.interval_ms = interval_ms.unwrap_or(session.interval_ms);
            session.duration_secs = duration_secs.unwrap_or(session.duration_secs);

            if let Err(e) = run_client(&config).await {
                error!("Client failed: {e}");
            }
        }
    }
}

async fn run_server(config: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let broker = Arc::new(Mutex::new(Broker::new()));

    tokio::select! {
        result = start_websocket_server(&addr, &config.server.endpoint, broker) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

/// Connect, subscribe, send the first message, then one more every interval
/// until the session duration is over or Ctrl-C is pressed.
async fn run_client(config: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let session = &config.session;
    let options = config.client.connect_options();
    let mut client = TestClient::new(options, LoggingObserver);

    client.connect(&config.client.url)?;
    client
        .wait_for_status(ConnectionStatus::Connected, options.connect_timeout)
        .await?;

    client.subscribe(session.channel_id)?;
    client.send_message(session.channel_id, &session.message)?;

    let period = Duration::from_millis(session.interval_ms.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = sleep_until(Instant::now() + Duration::from_secs(session.duration_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let content = format!("Auto message at {}", Local::now().format("%H:%M:%S"));
                if let Err(e) = client.send_message(session.channel_id, &content) {
                    warn!("Skipped automatic message: {e}");
                }
            }
            _ = &mut deadline => {
                info!("Session finished after {}s", session.duration_secs);
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
