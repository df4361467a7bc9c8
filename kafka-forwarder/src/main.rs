use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use kafka_forwarder::transform::JsonPassthrough;
use kafka_forwarder::{server, Config, Forwarder};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

fn start_server(config: &Config) -> JoinHandle<()> {
    let router = server::setup_metrics_routes(server::liveness_router());
    let bind = config.bind_address();

    tokio::task::spawn(async move {
        server::serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("Starting kafka-forwarder");

    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;

    let server_handle = start_server(&config);
    info!("Started liveness/metrics server on {}", config.bind_address());

    let mut forwarder = Forwarder::new(config, Arc::new(JsonPassthrough));
    forwarder
        .start()
        .context("Failed to start forwarder. Check your Kafka connection configuration.")?;

    shutdown_signal().await;
    info!("Received shutdown signal, draining partition workers");

    // Blocks until every worker has drained its stream and flushed.
    forwarder.stop().await;

    server_handle.abort();
    Ok(())
}
