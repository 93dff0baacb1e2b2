use std::path::PathBuf;

use ldapsense::config::Configuration;
use ldapsense::{app, initialize_state, telemetry};
use opentelemetry::global;
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = std::env::var(OTLP_ENDPOINT).ok();

    // export logs only when a collector is configured.
    let logging = match endpoint.as_deref() {
        Some(endpoint) => Some(telemetry::setup_logging(endpoint)?),
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(logging)
        .init();

    let tracer = match endpoint {
        Some(_) => {
            let provider = telemetry::setup_tracer()?;
            global::set_tracer_provider(provider.clone());
            Some(provider)
        },
        None => None,
    };

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "prometheus recorder not installed, /metrics disabled");
            None
        },
    };

    let config = std::env::var("CONFIG_PATH")
        .map(|path| Configuration::default().path(PathBuf::from(path)))
        .unwrap_or_default()
        .read();
    let address = format!("{}:{}", config.address, config.port);
    let state = initialize_state(config, metrics);

    let listener = TcpListener::bind(&address).await?;
    tracing::info!(%address, "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(provider) = tracer {
        if let Err(err) = provider.shutdown() {
            tracing::error!(error = %err, "cannot flush pending spans");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
