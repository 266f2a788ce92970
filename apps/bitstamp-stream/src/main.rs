//! Bitstamp Stream Binary
//!
//! Connects to Bitstamp's public WebSocket feed, subscribes the configured
//! channels, and logs every envelope until shut down.
//!
//! # Usage
//!
//! ```bash
//! BITSTAMP_CHANNELS=live_trades_btcusd,order_book_btcusd cargo run --bin bitstamp-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BITSTAMP_CHANNELS`: Comma-separated channel names
//!
//! ## Optional
//! - `BITSTAMP_WS_URL`: Stream endpoint (default: wss://ws.bitstamp.net)
//! - `BITSTAMP_READ_TIMEOUT_SECS`: Per-read deadline (default: 30)
//! - `BITSTAMP_EVENT_CAPACITY` / `BITSTAMP_ERROR_CAPACITY`: Queue sizes
//! - `BITSTAMP_MAX_CONSECUTIVE_ERRORS`: Errors before reconnect (default: 5)
//! - `BITSTAMP_RECONNECT_DELAY_INITIAL_MS`, `BITSTAMP_RECONNECT_DELAY_MAX_SECS`,
//!   `BITSTAMP_RECONNECT_DELAY_MULTIPLIER`, `BITSTAMP_MAX_RECONNECT_ATTEMPTS`
//! - `BITSTAMP_METRICS_PORT`: Prometheus metrics port, 0 disables (default: 9090)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: bitstamp-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bitstamp_stream::infrastructure::telemetry;
use bitstamp_stream::{
    SessionEvent, StreamSettings, Supervisor, SupervisorConfig, WsConnector, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Supervisor event queue capacity.
const SESSION_EVENT_CAPACITY: usize = 1024;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("a rustls crypto provider is already installed"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Bitstamp stream");

    let settings = StreamSettings::from_env().context("invalid configuration")?;
    log_config(&settings);

    if let Some(addr) = init_metrics(settings.metrics_port)? {
        tracing::info!(%addr, "Prometheus metrics listening");
    }

    let shutdown_token = CancellationToken::new();
    let (supervisor, mut events) = Supervisor::new(
        Arc::new(WsConnector::new()),
        SupervisorConfig::from_settings(&settings),
        SESSION_EVENT_CAPACITY,
        shutdown_token.clone(),
    );

    let mut supervisor_task = tokio::spawn(supervisor.run());

    let consumer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_session_event(&event);
        }
    });

    tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => {}
        finished = &mut supervisor_task => {
            shutdown_token.cancel();
            let _ = consumer.await;
            finished
                .context("supervisor task panicked")?
                .context("stream supervisor stopped")?;
            return Ok(());
        }
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, supervisor_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Supervisor stopped with error"),
        Ok(Err(e)) => tracing::error!(error = %e, "Supervisor task panicked"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Supervisor did not stop in time"
        ),
    }
    let _ = consumer.await;

    tracing::info!("Bitstamp stream stopped");
    Ok(())
}

/// Log one supervisor event.
fn log_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::Connected { client_id } => {
            tracing::info!(%client_id, "Stream connected");
        }
        SessionEvent::Disconnected { client_id, reason } => {
            tracing::warn!(%client_id, %reason, "Stream disconnected");
        }
        SessionEvent::Reconnecting { attempt, delay } => {
            tracing::info!(attempt, ?delay, "Stream reconnecting");
        }
        SessionEvent::ReconnectRequested { client_id } => {
            tracing::info!(%client_id, "Server requested reconnect");
        }
        SessionEvent::Envelope(envelope) => {
            tracing::info!(
                event = %envelope.event,
                channel = %envelope.channel,
                data = %envelope.data,
                "Envelope"
            );
        }
        SessionEvent::Error(msg) => {
            tracing::warn!(error = %msg, "Stream error");
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir()
        && let Some(env_path) = cwd
            .ancestors()
            .skip(1)
            .map(|dir| dir.join(".env"))
            .find(|path| path.exists())
    {
        let _ = dotenvy::from_path(&env_path);
    }
}

/// Log the parsed configuration.
fn log_config(settings: &StreamSettings) {
    tracing::info!(
        url = %settings.url,
        channels = settings.channels.len(),
        read_timeout_secs = settings.read_timeout.as_secs(),
        max_consecutive_errors = settings.max_consecutive_errors,
        metrics_port = settings.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(channels = ?settings.channels.as_slice(), "Subscribed channels");
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
