use std::net::SocketAddr;

use anyhow::Context;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod app;
mod common;
mod config;
mod infrastructure;
mod modules;
mod routes;
mod state;
mod workers;

use crate::config::settings::AppConfig;
use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::infrastructure::storage::s3::StorageService;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::new().context("invalid configuration")?;
    init_tracing(config.log_json);

    info!("Starting process-video-service");

    let queue = RabbitMqService::new(&config.rabbitmq_url, config.prefetch_count).await?;
    let storage = StorageService::new(
        &config.bucket_url,
        &config.bucket_region,
        &config.bucket_access_key,
        &config.bucket_secret_key,
    );
    if let Err(e) = storage
        .ensure_bucket_exists(&config.bucket_processed_name)
        .await
    {
        warn!("Could not ensure bucket {}: {}", config.bucket_processed_name, e);
    }

    let state = AppState::new(config.clone(), queue, storage);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Health endpoint on http://{}", addr);

    let server = {
        let stop = shutdown.clone().cancelled_owned();
        tokio::spawn(async move {
            axum::serve(listener, app::create_app())
                .with_graceful_shutdown(stop)
                .await
        })
    };

    let worker = workers::transcoder::start_transcoder_worker(state, shutdown.clone()).await;
    let stopped_unexpectedly = !shutdown.is_cancelled();
    shutdown.cancel();

    match server.await {
        Ok(Err(e)) => error!("Health server error: {}", e),
        Err(e) => error!("Health server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    worker?;
    if stopped_unexpectedly {
        anyhow::bail!("upload consumer stopped unexpectedly");
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(env_filter)
            .init();
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    token.cancel();
}
