use crate::blueprints::Registry;
use crate::config::Credentials;
use crate::monitor::Monitor;
use crate::nginx::NginxManager;
use crate::store::SqliteStore;
use crate::systemd::SystemdManager;
use std::sync::Arc;

/// Shared handles threaded through every request handler. Cloning is
/// cheap; all members are reference-counted or pooled.
#[derive(Clone)]
pub struct AppState {
    pub store: SqliteStore,
    pub systemd: Arc<SystemdManager>,
    pub blueprints: Arc<Registry>,
    pub nginx: Arc<NginxManager>,
    pub monitor: Arc<Monitor>,
    pub credentials: Arc<Credentials>,
}
