//! Context-aware façade over systemd and its journal: lifecycle verbs,
//! status queries, timestamp-filtered log retrieval, cancellable
//! follow-mode streaming, and idempotent unit install/uninstall.
//!
//! Every subprocess is spawned with `kill_on_drop`, so dropping the
//! future (request cancelled, client gone) terminates the child.

pub mod generator;

use crate::blueprints::Registry;
use serde::Serialize;
use servio_core::{Error, Result, Service};
use servio_utils::{fs as sfs, process};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

const UNIT_DIR: &str = "/etc/systemd/system";

/// The runtime state of a unit as reported by systemd.
#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub name: String,
    pub active: bool,
    pub enabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
}

pub struct SystemdManager {
    blueprints: Arc<Registry>,
    unit_dir: PathBuf,
    systemctl_bin: String,
    journalctl_bin: String,
}

impl SystemdManager {
    pub fn new(blueprints: Arc<Registry>) -> Self {
        Self {
            blueprints,
            unit_dir: PathBuf::from(UNIT_DIR),
            systemctl_bin: "systemctl".to_string(),
            journalctl_bin: "journalctl".to_string(),
        }
    }

    /// Construction seam for tests: a scratch unit directory and
    /// stand-in binaries for systemctl / journalctl.
    pub fn with_paths(
        blueprints: Arc<Registry>,
        unit_dir: impl Into<PathBuf>,
        systemctl_bin: impl Into<String>,
        journalctl_bin: impl Into<String>,
    ) -> Self {
        Self {
            blueprints,
            unit_dir: unit_dir.into(),
            systemctl_bin: systemctl_bin.into(),
            journalctl_bin: journalctl_bin.into(),
        }
    }

    pub fn unit_path(&self, unit_name: &str) -> PathBuf {
        self.unit_dir.join(unit_name)
    }

    async fn run_verb(&self, verb: &str, unit_name: &str) -> Result<()> {
        process::run_checked(&self.systemctl_bin, &[verb, unit_name]).await?;
        Ok(())
    }

    pub async fn start(&self, unit_name: &str) -> Result<()> {
        self.run_verb("start", unit_name).await
    }

    pub async fn stop(&self, unit_name: &str) -> Result<()> {
        self.run_verb("stop", unit_name).await
    }

    pub async fn restart(&self, unit_name: &str) -> Result<()> {
        self.run_verb("restart", unit_name).await
    }

    pub async fn enable(&self, unit_name: &str) -> Result<()> {
        self.run_verb("enable", unit_name).await
    }

    pub async fn disable(&self, unit_name: &str) -> Result<()> {
        self.run_verb("disable", unit_name).await
    }

    /// Reloads the unit catalog (`daemon-reload`).
    pub async fn reload(&self) -> Result<()> {
        process::run_checked(&self.systemctl_bin, &["daemon-reload"]).await?;
        Ok(())
    }

    /// Queries active/enabled/status. None of the three queries failing
    /// is an error: inactive or unknown units legitimately exit non-zero.
    pub async fn status(&self, unit_name: &str) -> UnitStatus {
        let active = process::run(&self.systemctl_bin, &["is-active", unit_name]).await;
        let enabled = process::run(&self.systemctl_bin, &["is-enabled", unit_name]).await;
        let status =
            process::run(&self.systemctl_bin, &["status", unit_name, "--no-pager"]).await;

        UnitStatus {
            name: unit_name.to_string(),
            active: active.stdout.trim() == "active",
            enabled: enabled.stdout.trim() == "enabled",
            output: status.stdout,
        }
    }

    /// The unit's recorded `ActiveEnterTimestamp`, empty if never started.
    pub async fn start_time(&self, unit_name: &str) -> Result<String> {
        let out = process::run_checked(
            &self.systemctl_bin,
            &["show", "-p", "ActiveEnterTimestamp", "--value", unit_name],
        )
        .await?;
        Ok(out.trim().to_string())
    }

    /// Journal output for the unit within the given time range. An empty
    /// `since` or `until` omits that bound.
    pub async fn logs(&self, unit_name: &str, since: &str, until: &str) -> Result<String> {
        let mut args = vec!["-u", unit_name, "--no-pager", "-o", "short-iso"];
        if !since.is_empty() {
            args.push("--since");
            args.push(since);
        }
        if !until.is_empty() {
            args.push("--until");
            args.push(until);
        }
        process::run_checked(&self.journalctl_bin, &args).await
    }

    /// Starts a follow-mode journal subprocess and returns its lines as
    /// a channel. Dropping the receiver kills the subprocess within a
    /// bounded delay; the producer also exits on journal EOF.
    pub fn stream_logs(&self, unit_name: &str) -> Result<mpsc::Receiver<String>> {
        let mut child = Command::new(&self.journalctl_bin)
            .args(["-u", unit_name, "-f", "--no-pager", "-o", "short-iso"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::internal("failed to start journalctl", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("journalctl stdout unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) | Err(_) => break,
                    },
                    () = tx.closed() => break,
                }
            }
            let _ = child.kill().await;
            let _ = child.wait().await;
        });

        Ok(rx)
    }

    /// Renders the unit text for a service (see [`generator::render_unit`]).
    pub fn render_unit(&self, service: &Service) -> String {
        generator::render_unit(service, &self.blueprints)
    }

    /// Installs the unit for a service: user check, executable check,
    /// working-directory creation, atomic unit write, daemon reload.
    /// Each step runs only if the prior succeeded.
    pub async fn install_service(&self, service: &Service) -> Result<()> {
        let unit_name = service.unit_name();
        info!(service = %service.name, user = %service.user, "installing unit");

        if !service.user.is_empty() && service.user != "root" {
            let check = process::run("id", &["-u", &service.user]).await;
            if !check.success {
                return Err(Error::Preflight(format!(
                    "system user '{}' does not exist; install the corresponding package \
                     (e.g. postgresql-server) or change the service user",
                    service.user
                )));
            }
        }

        if let Some(exe) = service.command.split_whitespace().next() {
            if exe.starts_with('/') && !Path::new(exe).exists() {
                return Err(Error::Preflight(format!(
                    "executable '{exe}' not found on server"
                )));
            }
        }

        let content = self.render_unit(service);

        if !service.working_dir.is_empty() && service.working_dir != "/" {
            self.ensure_working_dir(&service.working_dir, &service.user)
                .await?;
        }

        sfs::write_atomic(&self.unit_path(&unit_name), content.as_bytes(), 0o644).await?;

        // A reload failure is reported but the unit file stays in place.
        self.reload().await
    }

    async fn ensure_working_dir(&self, working_dir: &str, user: &str) -> Result<()> {
        let dir = Path::new(working_dir);
        if dir.exists() {
            return Ok(());
        }

        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            Error::Preflight(format!("failed to create working directory '{working_dir}': {e}"))
        })?;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| {
                Error::Preflight(format!("failed to chmod working directory '{working_dir}': {e}"))
            })?;

        if !user.is_empty() && user != "root" {
            let chown = process::run("chown", &[user, working_dir]).await;
            if !chown.success {
                warn!(dir = working_dir, user, output = %chown.combined,
                    "failed to chown working directory");
            }
        }

        Ok(())
    }

    /// Removes a unit: best-effort stop and disable, remove the unit
    /// file (ENOENT is fine), reload. All steps run; the first fatal
    /// error is returned.
    pub async fn uninstall_service(&self, unit_name: &str) -> Result<()> {
        if let Err(e) = self.stop(unit_name).await {
            warn!(unit = unit_name, error = %e, "stop before uninstall failed");
        }
        if let Err(e) = self.disable(unit_name).await {
            warn!(unit = unit_name, error = %e, "disable before uninstall failed");
        }

        let removed = sfs::remove_if_exists(&self.unit_path(unit_name)).await;
        let reloaded = self.reload().await;

        removed.and(reloaded)
    }

    pub fn service_exists(&self, unit_name: &str) -> bool {
        self.unit_path(unit_name).exists()
    }
}
