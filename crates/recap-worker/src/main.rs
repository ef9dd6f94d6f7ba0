//! Pipeline worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use recap_worker::{spawn_recovery_sweeps, Dispatcher, ProcessingContext, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("recap=info".parse().unwrap())
        .add_directive("aws_config=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting recap-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let ctx = match ProcessingContext::new(config).await {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("Failed to build processing context: {}", e);
            std::process::exit(1);
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&ctx)));
    let sweeps = spawn_recovery_sweeps(Arc::clone(&ctx), dispatcher.shutdown_rx());

    // Signal handler flips the shutdown switch; the dispatcher drains.
    let signal_dispatcher = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_dispatcher.shutdown();
    });

    if let Err(e) = dispatcher.run().await {
        error!("Dispatcher error: {}", e);
        std::process::exit(1);
    }

    sweeps.await.ok();
    info!("Worker shutdown complete");
}
