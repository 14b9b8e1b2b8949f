//! Reverse-proxy site synthesis and safe apply.
//!
//! A project plus its routable services becomes one nginx server block;
//! `project.nginx_raw` short-circuits generation entirely. Applying a
//! site is write → config test → reload, rolling the written file back
//! when the test fails. Apply/remove sequences are serialized through a
//! single mutex so two projects cannot race the proxy reload.

use servio_core::{Error, Project, Result};
use servio_utils::{fs as sfs, process};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::RwLock;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone)]
struct SiteLayout {
    /// Where site files are written.
    available: PathBuf,
    /// Symlink directory for the Debian-style layout; `None` for the
    /// single drop-in directory layout.
    enabled: Option<PathBuf>,
}

pub struct NginxManager {
    layout: RwLock<SiteLayout>,
    test_cmd: Vec<String>,
    reload_cmd: Vec<String>,
    apply_lock: Mutex<()>,
}

impl Default for NginxManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NginxManager {
    pub fn new() -> Self {
        Self {
            layout: RwLock::new(SiteLayout {
                available: PathBuf::from("/etc/nginx/conf.d"),
                enabled: None,
            }),
            test_cmd: vec!["sudo".into(), "nginx".into(), "-t".into()],
            reload_cmd: vec![
                "sudo".into(),
                "systemctl".into(),
                "reload".into(),
                "nginx".into(),
            ],
            apply_lock: Mutex::new(()),
        }
    }

    /// Construction seam for tests: scratch directories and stand-in
    /// test/reload commands.
    pub fn with_layout(
        available: impl Into<PathBuf>,
        enabled: Option<PathBuf>,
        test_cmd: Vec<String>,
        reload_cmd: Vec<String>,
    ) -> Self {
        Self {
            layout: RwLock::new(SiteLayout {
                available: available.into(),
                enabled,
            }),
            test_cmd,
            reload_cmd,
            apply_lock: Mutex::new(()),
        }
    }

    /// Selects the site-file layout for the given distro: Debian-family
    /// distros use sites-available plus a sites-enabled symlink,
    /// everything else a single conf.d drop-in directory.
    pub fn configure(&self, distro: &str) {
        let mut layout = self.layout.write().unwrap();
        if distro == "ubuntu" || distro == "debian" {
            layout.available = PathBuf::from("/etc/nginx/sites-available");
            layout.enabled = Some(PathBuf::from("/etc/nginx/sites-enabled"));
            info!("distro set to ubuntu/debian, using sites-available layout");
        } else {
            layout.available = PathBuf::from("/etc/nginx/conf.d");
            layout.enabled = None;
            info!("distro set to rhel-family, using conf.d layout");
        }
    }

    /// The site text for a project: the raw override verbatim when set,
    /// otherwise the generated default.
    pub fn generate_site(&self, project: &Project) -> Result<String> {
        if !project.nginx_raw.is_empty() {
            return Ok(project.nginx_raw.clone());
        }
        self.generate_default(project)
    }

    /// Generates the default server block. Requires a domain; iterates
    /// services in stored order, routing `location /` to the first one
    /// with a port (8000 when none has one).
    pub fn generate_default(&self, project: &Project) -> Result<String> {
        if project.domain.is_empty() {
            return Err(Error::Validation(
                "project has no domain configured".to_string(),
            ));
        }

        let mut upstreams = String::new();
        let mut primary_port: i64 = 0;
        for svc in &project.services {
            if svc.port > 0 {
                if primary_port == 0 {
                    primary_port = svc.port;
                }
                upstreams.push_str(&format!(
                    "    # {}\n    # server 127.0.0.1:{};\n",
                    svc.name, svc.port
                ));
            }
        }
        if primary_port == 0 {
            primary_port = 8000;
        }

        Ok(format!(
            r#"# Managed by Servio - Project: {name}
# Generated: Do not edit manually, changes will be overwritten

server {{
    listen 80;
    server_name {domain};

    # Security headers
    add_header X-Frame-Options "SAMEORIGIN" always;
    add_header X-Content-Type-Options "nosniff" always;

    # Logging
    access_log /var/log/nginx/{name}.access.log;
    error_log /var/log/nginx/{name}.error.log;

{upstreams}    location / {{
        proxy_pass http://127.0.0.1:{primary_port};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_read_timeout 86400;
    }}

    location /static/ {{
        alias /var/www/static/;
        expires 30d;
        add_header Cache-Control "public, immutable";
    }}

    # Error pages
    error_page 502 503 504 /50x.html;
    location = /50x.html {{
        root /usr/share/nginx/html;
    }}
}}
"#,
            name = project.name,
            domain = project.domain,
            upstreams = upstreams,
            primary_port = primary_port,
        ))
    }

    /// The path the project's site file is written to.
    pub fn site_path(&self, project: &Project) -> PathBuf {
        let layout = self.layout.read().unwrap();
        layout.available.join(site_filename(project))
    }

    fn enabled_path(&self, project: &Project) -> Option<PathBuf> {
        let layout = self.layout.read().unwrap();
        layout
            .enabled
            .as_ref()
            .map(|dir| dir.join(site_filename(project)))
    }

    pub fn site_exists(&self, project: &Project) -> bool {
        self.site_path(project).exists()
    }

    /// Safe apply: write the site file, link it (symlink layout), run
    /// the proxy's config test, reload. A failed test rolls back the
    /// file and the symlink before surfacing the tester's output; the
    /// reload is never attempted in that case.
    pub async fn install_site(&self, project: &Project) -> Result<()> {
        let _guard = self.apply_lock.lock().await;

        let config = self.generate_site(project)?;
        let path = self.site_path(project);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::internal("failed to create site directory", e))?;
        }

        tokio::fs::write(&path, config.as_bytes())
            .await
            .map_err(|e| Error::internal("failed to write site config", e))?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .await
            .map_err(|e| Error::internal("failed to chmod site config", e))?;
        info!(path = %path.display(), project = %project.name, "wrote nginx config");

        let enabled = self.enabled_path(project);
        if let Some(link) = &enabled {
            if let Some(parent) = link.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::internal("failed to create sites-enabled directory", e))?;
            }
            sfs::remove_if_exists(link).await?;
            tokio::fs::symlink(&path, link)
                .await
                .map_err(|e| Error::internal("failed to create site symlink", e))?;
        }

        if let Err(e) = self.run_command(&self.test_cmd).await {
            let _ = sfs::remove_if_exists(&path).await;
            if let Some(link) = &enabled {
                let _ = sfs::remove_if_exists(link).await;
            }
            let output = match e {
                Error::Subprocess { output, .. } => output,
                other => other.to_string(),
            };
            return Err(Error::ConfigInvalid(output));
        }

        self.run_command(&self.reload_cmd).await?;
        info!(project = %project.name, "nginx site deployed");
        Ok(())
    }

    /// Removes the symlink (if any) and the site file, ignoring absence,
    /// then reloads the proxy.
    pub async fn uninstall_site(&self, project: &Project) -> Result<()> {
        let _guard = self.apply_lock.lock().await;

        if let Some(link) = self.enabled_path(project) {
            let _ = sfs::remove_if_exists(&link).await;
        }
        sfs::remove_if_exists(&self.site_path(project)).await?;
        info!(project = %project.name, "removed nginx config");

        self.run_command(&self.reload_cmd).await
    }

    async fn run_command(&self, cmd: &[String]) -> Result<()> {
        let args: Vec<&str> = cmd.iter().skip(1).map(String::as_str).collect();
        process::run_checked(&cmd[0], &args).await?;
        Ok(())
    }
}

fn site_filename(project: &Project) -> String {
    format!("servio-{}-{}.conf", project.id, sanitize_name(&project.name))
}

/// Lowercases, turns spaces into hyphens, and drops everything outside
/// `[a-z0-9-]`.
fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}
