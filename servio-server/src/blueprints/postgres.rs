use async_trait::async_trait;
use servio_core::{Result, Service};
use servio_utils::process;
use tracing::{debug, info, warn};

use super::{
    config_i64, config_str, install_package, parse_config, Blueprint, BlueprintDefaults,
    BlueprintMetadata,
};

const VERSIONS: &[&str] = &["16", "15", "14", "13"];
const DEFAULT_VERSION: &str = "16";

/// One canonical binary layout is used on every distro: `/usr/bin/postgres`
/// with `PGDATA=/var/lib/pgsql/data`. The `distro` setting only affects the
/// reverse-proxy file layout, never this path.
const POSTGRES_BIN: &str = "/usr/bin/postgres";
const DATA_DIR: &str = "/var/lib/pgsql/data";
const DEFAULT_PORT: i64 = 5432;

/// Blueprint for PostgreSQL services.
///
/// Honors `db_port`, `max_connections`, `shared_buffers`, and `work_mem`
/// from the service's config JSON.
pub struct PostgresBlueprint;

impl PostgresBlueprint {
    fn port(service: &Service) -> i64 {
        config_i64(&parse_config(&service.config), "db_port", DEFAULT_PORT)
    }
}

#[async_trait]
impl Blueprint for PostgresBlueprint {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    fn metadata(&self) -> BlueprintMetadata {
        BlueprintMetadata {
            kind: "postgres",
            display_name: "PostgreSQL",
            description: "Powerful, open source object-relational database",
            icon: "🐘",
            versions: VERSIONS,
            default_version: DEFAULT_VERSION,
        }
    }

    fn defaults(&self, version: &str) -> BlueprintDefaults {
        let version = if version.is_empty() {
            DEFAULT_VERSION
        } else {
            version
        };
        BlueprintDefaults {
            command: format!("{POSTGRES_BIN} -D {DATA_DIR}"),
            user: "postgres".to_string(),
            working_dir: "/var/lib/pgsql".to_string(),
            hint: format!("PostgreSQL {version} with data directory configured."),
        }
    }

    fn generate_command(&self, service: &Service) -> String {
        let config = parse_config(&service.config);
        let port = config_i64(&config, "db_port", DEFAULT_PORT);

        let mut cmd = format!("{POSTGRES_BIN} -D {DATA_DIR}");

        if port != DEFAULT_PORT {
            cmd.push_str(&format!(" -p {port}"));
        }
        let max_connections = config_i64(&config, "max_connections", 0);
        if max_connections > 0 {
            cmd.push_str(&format!(" -c max_connections={max_connections}"));
        }
        let shared_buffers = config_str(&config, "shared_buffers", "");
        if !shared_buffers.is_empty() {
            cmd.push_str(&format!(" -c shared_buffers={shared_buffers}"));
        }
        let work_mem = config_str(&config, "work_mem", "");
        if !work_mem.is_empty() {
            cmd.push_str(&format!(" -c work_mem={work_mem}"));
        }

        cmd
    }

    fn generate_environment(&self, service: &Service) -> String {
        format!("PGDATA={DATA_DIR}\nPGPORT={}", Self::port(service))
    }

    fn generate_overrides(&self, _service: &Service) -> String {
        "[Service]\n\
         Type=notify\n\
         User=postgres\n\
         Group=postgres\n\
         OOMScoreAdjust=-1000\n\
         LimitNOFILE=65536"
            .to_string()
    }

    async fn install_dependencies(&self, version: &str) -> Result<()> {
        let version = if version.is_empty() {
            DEFAULT_VERSION
        } else {
            version
        };
        info!(version, "installing PostgreSQL");

        let debian = install_package(
            &format!("postgresql{version}-server"),
            &format!("postgresql-{version}"),
        )
        .await?;

        // Debian-family packages initialize the cluster on install; the
        // RHEL family needs an explicit initdb, with several generations
        // of setup script to try.
        if !debian {
            let setup = process::run("sudo", &["postgresql-setup", "--initdb"]).await;
            if !setup.success {
                debug!(output = %setup.combined, "postgresql-setup failed, trying version-specific script");
                let script = format!("/usr/pgsql-{version}/bin/postgresql-{version}-setup");
                let versioned = process::run("sudo", &[&script, "initdb"]).await;
                if !versioned.success {
                    debug!(output = %versioned.combined, "versioned setup failed, trying initdb directly");
                    let direct =
                        process::run("sudo", &["-u", "postgres", "initdb", "-D", DATA_DIR]).await;
                    if !direct.success {
                        warn!(output = %direct.combined, "database init failed (may already exist)");
                    }
                }
            }
        }

        info!(version, debian, "PostgreSQL installation completed");
        Ok(())
    }
}
