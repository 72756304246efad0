//! Alpaca Stream Client Binary
//!
//! Serves the login front end; a successful login opens the market data
//! session and routes its records to the event log.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin alpaca-stream-client
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `ALPACA_FEED`: Market data feed - "sip" | "iex" (default: sip)
//! - `ALPACA_STREAM_URL`: Override the stream endpoint
//! - `STREAM_CLIENT_HTTP_PORT`: Login/health/metrics HTTP port (default: 8080)
//! - `STREAM_CLIENT_INITIAL_SYMBOLS`: Comma-separated symbols subscribed after login
//! - `STREAM_CLIENT_*_CAPACITY`: Output queue capacities
//! - `STREAM_CLIENT_MAX_CONCURRENT_DECODES`: Decode task limit (default: 64)
//! - `STREAM_CLIENT_CLOSE_ATTEMPTS`: Closure frame send attempts (default: 10)
//! - `STREAM_CLIENT_CLOSE_RETRY_DELAY_MS`: Pause between attempts (default: 1000)
//! - `STREAM_CLIENT_CLOSE_ACK_TIMEOUT_SECS`: Closure acknowledgment wait (default: 10)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: alpaca-stream-client)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use alpaca_stream_client::infrastructure::telemetry;
use alpaca_stream_client::{
    ClientConfig, HttpServer, SessionLauncher, TracingEventSink, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv_from_ancestors();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Alpaca Stream Client");

    let _metrics_handle = init_metrics();

    let config = ClientConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let launcher = Arc::new(SessionLauncher::new(
        config.clone(),
        Arc::new(TracingEventSink),
        shutdown_token.clone(),
    ));

    let http_server = HttpServer::new(
        config.server.http_port,
        Arc::clone(&launcher),
        shutdown_token.clone(),
    );

    let server = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Stream client ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        launcher.shutdown().await;
        let _ = server.await;
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out with sessions still closing"
        );
    }

    tracing::info!("Stream client stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        feed = config.feed.as_str(),
        http_port = config.server.http_port,
        initial_symbols = ?config.initial_symbols,
        max_concurrent_decodes = config.max_concurrent_decodes,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.stream_url(),
        close_attempts = config.disconnect.close_attempts,
        close_ack_timeout_secs = config.disconnect.close_ack_timeout.as_secs(),
        "Stream endpoint"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
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

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
