//! Open Sandbox daemon: public HTTP surface, reverse proxy, worker surface
//! and the distributed execution layer, composed per the configured mode.

pub mod auth;
pub mod cluster;
pub mod config;
pub mod error;
pub mod proxy;
pub mod server;
pub mod telemetry;
pub mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use osb_engine::{Engine, EngineConfig, InvalidateHook, Runtime};
use osb_store::Store;

use crate::{
    cluster::{
        registry::WorkerRegistry,
        remote::{RemoteClient, RemoteConfig},
    },
    config::{Config, Mode},
    proxy::{cache::RouteCache, TargetResolver},
    server::AppState,
};

pub async fn run(config: Config) -> Result<()> {
    // An unopenable store is fatal by design.
    let store = Store::open(&config.db_path)
        .await
        .context("failed to open the sandbox store")?;

    match config.mode {
        Mode::Server => run_with_runtime(config, store, false).await,
        Mode::Worker => run_with_runtime(config, store, true).await,
        Mode::Orchestrator => run_orchestrator(config, store).await,
    }
}

/// Server and worker modes: local runtime, local engine, public API and
/// proxy; workers additionally expose the internal mirror and self-register.
async fn run_with_runtime(config: Config, store: Store, worker_mode: bool) -> Result<()> {
    let runtime = Runtime::connect()?;
    runtime
        .ping()
        .await
        .context("container runtime is unreachable")?;

    let cache = Arc::new(RouteCache::default());
    let invalidator: InvalidateHook = {
        let cache = cache.clone();
        Arc::new(move |name: &str| cache.invalidate(name))
    };
    let engine = Engine::new(
        store.clone(),
        runtime,
        EngineConfig {
            base_domain: Some(config.base_domain.clone()),
            proxy_port: config.proxy_port(),
        },
    )
    .with_invalidator(invalidator);

    let resolver = TargetResolver::new(
        store.clone(),
        cache.clone(),
        config.base_domain.clone(),
        None,
    );
    proxy::spawn(config.proxy_addrs()?, resolver);

    let state = Arc::new(AppState {
        backend: Arc::new(engine.clone()),
        api_key: config.api_key.clone(),
        worker_api_key: config.worker_api_key.clone(),
        registry: None,
    });

    let mut app = server::public_router(state.clone());
    if worker_mode {
        if state.worker_api_key.is_some() {
            app = app.merge(worker::worker_router(state.clone()));
        } else {
            warn!("worker mode without WORKER_API_KEY; internal surface disabled");
        }
    }

    let registration = if worker_mode {
        worker::register_with_orchestrator(&config).await?
    } else {
        None
    };

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind API listener")?;
    info!(
        addr = %addr,
        mode = ?config.mode,
        base_domain = %config.base_domain,
        "open sandbox daemon listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited")?;

    // Orderly teardown: command workers, timers, containers (30 s budget),
    // then the fleet record.
    engine.shutdown().await;
    if let Some(registration) = registration {
        registration.deregister().await;
    }
    Ok(())
}

/// Orchestrator mode: no local runtime; every operation is dispatched to
/// the registered worker fleet.
async fn run_orchestrator(config: Config, store: Store) -> Result<()> {
    let worker_key = config
        .worker_api_key
        .clone()
        .context("orchestrator mode requires WORKER_API_KEY")?;

    let registry = WorkerRegistry::load(store.clone())
        .await
        .context("failed to load worker registry")?;

    let cache = Arc::new(RouteCache::default());
    let invalidator: InvalidateHook = {
        let cache = cache.clone();
        Arc::new(move |name: &str| cache.invalidate(name))
    };
    let remote = RemoteClient::new(
        store.clone(),
        registry.clone(),
        RemoteConfig {
            base_domain: Some(config.base_domain.clone()),
            proxy_port: config.proxy_port(),
        },
    )
    .with_invalidator(invalidator);

    let resolver = TargetResolver::new(
        store.clone(),
        cache.clone(),
        config.base_domain.clone(),
        Some(registry.clone()),
    );
    proxy::spawn(config.proxy_addrs()?, resolver);

    let state = Arc::new(AppState {
        backend: Arc::new(remote),
        api_key: config.api_key.clone(),
        worker_api_key: Some(worker_key),
        registry: Some(registry),
    });

    let app = server::public_router(state.clone()).merge(worker::registry_router(state));

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind API listener")?;
    info!(
        addr = %addr,
        base_domain = %config.base_domain,
        "open sandbox orchestrator listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
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
    info!("shutdown signal received");
}
