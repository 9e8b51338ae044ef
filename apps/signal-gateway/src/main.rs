//! Signal Gateway Binary
//!
//! Starts the trading signal ingestion gateway.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin signal-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALLOWED_ORIGIN`: Origin suffix pattern, or `*` for any origin
//! - `AUTHORIZATION_TOKEN`: Shared secret, or `ALLOW` to bypass secret checks
//! - `SIGNAL_QUEUE_URL`: Queue URL
//! - `SIGNAL_QUEUE_ACCOUNT_NAME`: Storage account name
//! - `SIGNAL_QUEUE_ACCOUNT_KEY`: Base64 storage account key
//! - `SIGNAL_QUEUE_MESSAGE_TTL_SECS`: Message TTL, `-1` never expires
//! - `SIGNAL_QUEUE_CLIENT_TIMEOUT_MS`: Per-call queue timeout
//! - `SIGNAL_QUEUE_CLIENT_RETRIES`: Max tries per queue call (1-10)
//!
//! ## Optional
//! - `GATEWAY_HTTP_PORT` / `FUNCTIONS_CUSTOMHANDLER_PORT`: Listener port (default: 8080)
//! - `GATEWAY_PATH`: Endpoint path (default: /api/gateway)
//! - `GATEWAY_HEALTH_PORT`: Health and metrics port, 0 disables (default: 8082)
//! - `GATEWAY_REQUEST_TIMEOUT_MS`: Per-request deadline (default: 30000)
//! - `AUTH_HEADER_NAME`: Secret header (default: X-Gateway-Allow-Token)
//! - `REQUIRE_AUTH_HEADER` / `REQUIRE_SIGNAL_KEY`: Enable secret checks (default: false)
//! - `CORS_MAX_AGE_SECS`: Preflight max age (default: 600)
//! - `LOGGING_LEVEL`: ERROR | WARN | INFO | DEBUG | TRACE | OFF (default: INFO)
//! - `LOG_REQUESTS`: Dump every request to the log (default: false)
//! - `HONEY_POT_MODE`: Answer everything with 200 OK (default: false)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use signal_gateway::infrastructure::telemetry;
use signal_gateway::{
    AppState, AzureQueueClient, GatewayConfig, GatewayStats, HealthServer, HealthServerState,
    PolicyEvaluator, SignalDelivery, create_router, init_metrics,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for aborted requests to answer once the shutdown timeout expires.
const ABORT_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(errors) => {
            for error in errors.errors() {
                eprintln!("configuration error: {error}");
            }
            anyhow::bail!("refusing to start: {} configuration error(s)", errors.errors().len());
        }
    };

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init(config.log_level);

    tracing::info!("Starting Signal Gateway");
    for warning in &config.warnings {
        tracing::warn!(%warning, "Configuration warning");
    }

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let abort_token = CancellationToken::new();
    let stats = Arc::new(GatewayStats::new());

    let queue = Arc::new(
        AzureQueueClient::new(config.queue.client_config())
            .context("failed to build queue client")?,
    );
    let queue_name = queue.queue_name().to_string();
    let delivery = SignalDelivery::new(queue, config.queue.message_ttl);
    let policy = PolicyEvaluator::new(config.policy.clone());
    tracing::info!(checks = ?policy.checks(), "Admission checks enabled");

    // Spawn health server
    if config.server.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            queue_name,
            Arc::clone(&stats),
            shutdown_token.clone(),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    // Spawn gateway server
    let state = AppState::new(
        policy,
        delivery,
        config.server.clone(),
        stats,
        abort_token.clone(),
    );
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind gateway port {}", config.server.http_port))?;

    tracing::info!(addr = %addr, path = %config.server.path, "Gateway listening");

    let server_shutdown = shutdown_token.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
    });

    tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => {}
        result = &mut server => {
            shutdown_token.cancel();
            result
                .context("gateway server task failed")?
                .context("gateway server error")?;
            tracing::info!("Signal Gateway stopped");
            return Ok(());
        }
    }

    // In-flight deliveries keep running until the timeout, then are aborted.
    let drained = match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Graceful shutdown timed out, aborting in-flight requests"
            );
            abort_token.cancel();
            match tokio::time::timeout(ABORT_GRACE, &mut server).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!("Gateway server did not stop after abort");
                    server.abort();
                    return Ok(());
                }
            }
        }
    };

    match drained {
        Ok(Ok(())) => tracing::info!("Signal Gateway stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Gateway server error during shutdown"),
        Err(e) => tracing::error!(error = %e, "Gateway server task failed"),
    }

    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        path = %config.server.path,
        request_timeout_ms = u64::try_from(config.server.request_timeout.as_millis()).unwrap_or(u64::MAX),
        honeypot = config.server.honeypot,
        "Configuration loaded"
    );
    tracing::info!(
        allowed_origin = config.policy.origin.as_header_value(),
        auth_header = %config.policy.auth_header,
        require_auth_header = config.policy.require_auth_header,
        require_signal_key = config.policy.require_signal_key,
        "Admission policy"
    );
    tracing::debug!(
        queue_url = %config.queue.url,
        account = config.queue.credentials.account_name(),
        message_ttl = %config.queue.message_ttl,
        max_tries = config.queue.max_tries,
        "Queue endpoint"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
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
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
