//! # servio-server
//!
//! The servio daemon: a self-hosted control plane that turns declarative
//! project/service records into systemd units and nginx sites on the
//! local host, and supervises them through a JSON API.
//!
//! ## Lifecycle
//!
//! 1. **Startup**: load config, open the store (running migrations),
//!    build the blueprint registry and the supervisor/site/monitor
//!    managers.
//! 2. **Serve**: handle API requests; every handler re-reads its records
//!    from the store.
//! 3. **Shutdown**: SIGINT/SIGTERM drains in-flight handlers, with a
//!    10 s watchdog forcing exit.

pub mod api;
pub mod blueprints;
pub mod config;
pub mod git;
pub mod monitor;
pub mod nginx;
pub mod state;
pub mod store;
pub mod systemd;

use crate::blueprints::Registry;
use crate::config::{Config, Credentials};
use crate::monitor::Monitor;
use crate::nginx::NginxManager;
use crate::state::AppState;
use crate::store::SqliteStore;
use crate::systemd::SystemdManager;
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the daemon until a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.db_path))?;

    let blueprints = Arc::new(Registry::new());
    let systemd = Arc::new(SystemdManager::new(blueprints.clone()));
    let nginx = Arc::new(NginxManager::new());
    let monitor = Arc::new(Monitor::new());

    // Apply the persisted distro choice to the site-file layout.
    match store.get_setting("distro").await {
        Ok(distro) if !distro.is_empty() => nginx.configure(&distro),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to read distro setting"),
    }

    let state = AppState {
        store,
        systemd,
        blueprints,
        nginx,
        monitor,
        credentials: Arc::new(Credentials::from_env()),
    };

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    info!(addr = %config.addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Once a signal arrives, a watchdog
/// gives outstanding handlers 10 s before forcing the process down.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutting down");
    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        warn!("graceful shutdown timed out, forcing exit");
        std::process::exit(0);
    });
}
