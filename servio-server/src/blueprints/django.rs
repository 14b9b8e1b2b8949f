use async_trait::async_trait;
use servio_core::{Result, Service};
use servio_utils::process;
use tracing::{info, warn};

use super::{install_package, Blueprint, BlueprintDefaults, BlueprintMetadata};

const VERSIONS: &[&str] = &["22.0", "21.2", "20.1"];
const DEFAULT_VERSION: &str = "22.0";
const DEFAULT_WORKERS: i64 = 2;
const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_WSGI_MODULE: &str = "app.wsgi:application";

/// Django-specific keys read from the service's config JSON.
#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct DjangoConfig {
    wsgi_module: String,
    workers: i64,
    bind_address: String,
    venv_path: String,
}

impl Default for DjangoConfig {
    fn default() -> Self {
        Self {
            wsgi_module: DEFAULT_WSGI_MODULE.to_string(),
            workers: DEFAULT_WORKERS,
            bind_address: DEFAULT_BIND.to_string(),
            venv_path: String::new(),
        }
    }
}

impl DjangoConfig {
    fn parse(service: &Service) -> Self {
        if service.config.is_empty() {
            return Self::default();
        }
        match serde_json::from_str(&service.config) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "failed to parse django config");
                Self::default()
            }
        }
    }
}

/// Blueprint for Django applications served by Gunicorn.
pub struct DjangoBlueprint;

#[async_trait]
impl Blueprint for DjangoBlueprint {
    fn kind(&self) -> &'static str {
        "django"
    }

    fn metadata(&self) -> BlueprintMetadata {
        BlueprintMetadata {
            kind: "django",
            display_name: "Django",
            description: "Python web framework with Gunicorn WSGI server",
            icon: "🐍",
            versions: VERSIONS,
            default_version: DEFAULT_VERSION,
        }
    }

    fn defaults(&self, _version: &str) -> BlueprintDefaults {
        BlueprintDefaults {
            command: format!(
                "gunicorn --workers {DEFAULT_WORKERS} --bind {DEFAULT_BIND} {DEFAULT_WSGI_MODULE}"
            ),
            user: "www-data".to_string(),
            working_dir: "/var/www/app".to_string(),
            hint: "Gunicorn with default workers and bind address. Customize in the command."
                .to_string(),
        }
    }

    fn generate_command(&self, service: &Service) -> String {
        let cfg = DjangoConfig::parse(service);

        let gunicorn = if cfg.venv_path.is_empty() {
            "gunicorn".to_string()
        } else {
            format!("{}/bin/gunicorn", cfg.venv_path)
        };

        let workers = if cfg.workers > 0 {
            cfg.workers
        } else {
            DEFAULT_WORKERS
        };

        format!(
            "{gunicorn} --workers {workers} --bind {} {}",
            cfg.bind_address, cfg.wsgi_module
        )
    }

    fn generate_environment(&self, service: &Service) -> String {
        let cfg = DjangoConfig::parse(service);

        let mut env = String::from(
            "DJANGO_SETTINGS_MODULE=app.settings\n\
             PYTHONDONTWRITEBYTECODE=1\n\
             PYTHONUNBUFFERED=1\n",
        );

        if !cfg.venv_path.is_empty() {
            env.push_str(&format!("VIRTUAL_ENV={}\n", cfg.venv_path));
            env.push_str(&format!("PATH={}/bin:$PATH\n", cfg.venv_path));
        }

        env
    }

    fn generate_overrides(&self, _service: &Service) -> String {
        "[Service]\n\
         Type=notify\n\
         KillMode=mixed\n\
         TimeoutStopSec=5"
            .to_string()
    }

    async fn install_dependencies(&self, version: &str) -> Result<()> {
        let version = if version.is_empty() {
            DEFAULT_VERSION
        } else {
            version
        };
        info!(version, "installing Gunicorn");

        // python3-pip pulls python3 on both families.
        install_package("python3-pip", "python3-pip").await?;

        let pinned = process::run("pip3", &["install", &format!("gunicorn=={version}")]).await;
        if !pinned.success {
            warn!(output = %pinned.combined, "failed to install pinned gunicorn, trying latest");
            process::run_checked("pip3", &["install", "gunicorn"]).await?;
        }

        Ok(())
    }
}
