//! Shard Manager binary
//!
//! Loads configuration, starts the worker fleet and serves the control API
//! until a shutdown signal arrives.

use anyhow::Result;
use shard_manager::api;
use shard_manager::cluster::{Coordinator, NatsCoordinator};
use shard_manager::metrics::ManagerMetrics;
use shard_manager::moderation::{ModerationEngine, ModerationRules, NoticeSink};
use shard_manager::shard::TwilightLauncher;
use shard_manager::{Collaborators, ManagerConfig, ShardManager, StartupOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let config = ManagerConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("shard_manager={}", config.log_level).parse()?)
                .add_directive("twilight_gateway=info".parse()?)
                .add_directive("async_nats=warn".parse()?),
        )
        .json()
        .init();

    let node_id = uuid::Uuid::new_v4().to_string();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        node_id = %node_id,
        clustered = config.clustering_enabled(),
        "Starting shard manager"
    );

    let metrics = Arc::new(ManagerMetrics::install()?);
    info!("Prometheus metrics initialized");

    let http = Arc::new(twilight_http::Client::new(config.discord_token.clone()));

    let coordinator = match &config.cluster {
        Some(cluster) => {
            let coordinator = NatsCoordinator::connect(&cluster.nats_url, &cluster.subject_prefix)
                .await
                .inspect_err(|e| error!(error = %e, "Startup aborted"))?;
            Some(coordinator)
        }
        None => {
            info!("Clustering disabled - running standalone");
            None
        }
    };

    let engine = Arc::new(ModerationEngine::new(
        ModerationRules::new(),
        Arc::clone(&http) as Arc<dyn NoticeSink>,
        Arc::clone(&metrics),
    ));

    let intents = ManagerConfig::intents();
    info!(?intents, "Using Discord intents");

    let launcher = TwilightLauncher::new(
        config.discord_token.clone(),
        intents,
        Arc::clone(&http),
        engine,
        config.worker_call_timeout,
    );

    let collaborators = Collaborators {
        shard_source: http.as_ref(),
        coordinator: coordinator.as_ref().map(|c| c as &dyn Coordinator),
        launcher: &launcher,
    };
    let options = StartupOptions::from_config(&config, node_id);

    let started = ShardManager::start(collaborators, &options, Arc::clone(&metrics))
        .await
        .inspect_err(|e| error!(error = %e, "Startup aborted"))?;

    let Some(mut manager) = started else {
        info!("Exiting: no shards to run");
        return Ok(());
    };

    let router = api::router(manager.api_state(&config, Arc::clone(&metrics)));
    let addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port = config.http_port, "Control API listening");

    manager.signal_ready().await;

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down shard manager...");
    manager.shutdown();
    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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
}
