//! imgd server entry point.
//!
//! Loads configuration, opens the three resolver caches, and serves HTTP
//! until Ctrl-C or SIGTERM. On shutdown the listener drains first, then every
//! cache compactor is stopped and the caches are closed.

use std::sync::Arc;

use anyhow::Result;
use imgd_client::{Caches, McClient, Resolver, ResolverConfig, UpstreamConfig};
use imgd_core::{AppConfig, SharedClock, SystemClock, build_cache};
use imgd_server::{AppState, HttpConfig, build_router};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = AppConfig::load()?;
    let clock: SharedClock = Arc::new(SystemClock);

    let caches = Caches {
        uuid: build_cache(&config.cache_uuid, Arc::clone(&clock)).await?,
        userdata: build_cache(&config.cache_userdata, Arc::clone(&clock)).await?,
        textures: build_cache(&config.cache_textures, Arc::clone(&clock)).await?,
    };
    let upstream = McClient::new(UpstreamConfig::from_app(&config))?;
    let resolver = Resolver::new(caches, Arc::new(upstream), clock, ResolverConfig::from_app(&config)?)?;
    resolver.start();

    let app = build_router(AppState::new(resolver.clone(), HttpConfig::from_app(&config)));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "imgd listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!(stats = ?resolver.stats(), "closing caches");
    resolver.close().await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
