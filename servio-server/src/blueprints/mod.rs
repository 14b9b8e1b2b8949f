//! Typed templates for managed service kinds.
//!
//! A blueprint contributes the command, environment, and `[Service]`
//! overrides for services of its kind, plus a host package-manager
//! install flow. The registry is a type-string keyed table built once at
//! startup; adding a blueprint means implementing [`Blueprint`] and
//! registering it in [`Registry::new`].

mod django;
mod postgres;
mod redis;

pub use django::DjangoBlueprint;
pub use postgres::PostgresBlueprint;
pub use redis::RedisBlueprint;

use async_trait::async_trait;
use serde::Serialize;
use servio_core::{Result, Service};
use servio_utils::process;
use std::collections::HashMap;
use tracing::{info, warn};

/// Static blueprint information for UI enumeration.
#[derive(Debug, Clone, Serialize)]
pub struct BlueprintMetadata {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub versions: &'static [&'static str],
    pub default_version: &'static str,
}

/// Field defaults used to pre-fill a new-service form.
#[derive(Debug, Clone, Serialize)]
pub struct BlueprintDefaults {
    pub command: String,
    pub user: String,
    pub working_dir: String,
    pub hint: String,
}

#[async_trait]
pub trait Blueprint: Send + Sync {
    /// The registry key (e.g. `"postgres"`).
    fn kind(&self) -> &'static str;

    fn metadata(&self) -> BlueprintMetadata;

    fn defaults(&self, version: &str) -> BlueprintDefaults;

    /// The `ExecStart` command, used when the service record's own
    /// command is empty.
    fn generate_command(&self, service: &Service) -> String;

    /// Extra environment as newline-separated `KEY=VALUE` lines,
    /// prepended to the service's own environment.
    fn generate_environment(&self, service: &Service) -> String;

    /// Literal directives substituted into the `[Service]` section,
    /// starting with the `[Service]` header itself.
    fn generate_overrides(&self, service: &Service) -> String;

    /// Installs the host packages this kind needs. Cancelling the caller
    /// kills any package-manager subprocess in flight.
    async fn install_dependencies(&self, version: &str) -> Result<()>;
}

pub struct Registry {
    blueprints: HashMap<&'static str, Box<dyn Blueprint>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Builds the registry with every built-in blueprint.
    pub fn new() -> Self {
        let mut registry = Self {
            blueprints: HashMap::new(),
        };
        registry.register(Box::new(PostgresBlueprint));
        registry.register(Box::new(RedisBlueprint));
        registry.register(Box::new(DjangoBlueprint));
        registry
    }

    pub fn register(&mut self, blueprint: Box<dyn Blueprint>) {
        self.blueprints.insert(blueprint.kind(), blueprint);
    }

    pub fn get(&self, kind: &str) -> Option<&dyn Blueprint> {
        self.blueprints.get(kind).map(|bp| bp.as_ref())
    }

    pub fn is_managed(&self, kind: &str) -> bool {
        self.blueprints.contains_key(kind)
    }

    /// Metadata for every registered blueprint, ordered by kind so the
    /// listing is stable across runs.
    pub fn all_metadata(&self) -> Vec<BlueprintMetadata> {
        let mut metas: Vec<_> = self.blueprints.values().map(|bp| bp.metadata()).collect();
        metas.sort_by_key(|m| m.kind);
        metas
    }

    pub fn defaults(&self, kind: &str, version: &str) -> Option<BlueprintDefaults> {
        self.get(kind).map(|bp| bp.defaults(version))
    }
}

// --- Shared helpers for blueprint implementations ---

/// Parses the service's opaque `config` JSON into a map. Malformed JSON
/// is logged and treated as empty, matching the forgiving UI contract.
pub(crate) fn parse_config(config: &str) -> serde_json::Map<String, serde_json::Value> {
    if config.is_empty() {
        return serde_json::Map::new();
    }
    match serde_json::from_str(config) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => serde_json::Map::new(),
        Err(e) => {
            warn!(error = %e, "failed to parse service config");
            serde_json::Map::new()
        }
    }
}

pub(crate) fn config_i64(
    config: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    default: i64,
) -> i64 {
    config.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
}

pub(crate) fn config_str<'a>(
    config: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
    default: &'a str,
) -> &'a str {
    config.get(key).and_then(|v| v.as_str()).unwrap_or(default)
}

/// Installs a package with `dnf`, falling back to `apt-get` when the
/// first manager is unavailable or fails. The earlier failure is logged
/// and deliberately discarded; only the final manager's failure bubbles
/// up, carrying the combined subprocess output.
///
/// Returns whether the Debian-family path was taken.
pub(crate) async fn install_package(dnf_package: &str, apt_package: &str) -> Result<bool> {
    let dnf = process::run("sudo", &["dnf", "install", "-y", dnf_package]).await;
    if dnf.success {
        return Ok(false);
    }

    info!(output = %dnf.combined, "dnf unavailable or failed, trying apt-get");
    let _ = process::run("sudo", &["apt-get", "update"]).await;
    process::run_checked("sudo", &["apt-get", "install", "-y", apt_package]).await?;
    Ok(true)
}
