//! Unit-file synthesis: a pure, deterministic function from a service
//! record (plus its blueprint, if any) to unit text.

use crate::blueprints::Registry;
use servio_core::Service;
use std::path::Path;
use tracing::debug;

/// Renders the unit file for a service.
///
/// Decision tree:
/// 1. A non-empty `systemd_raw` is the operator's escape hatch and is
///    returned verbatim.
/// 2. A registered blueprint contributes the command (when the record's
///    own command is empty), environment lines (prepended to the
///    record's), and `[Service]` overrides (replacing the default
///    `Type`/`User`/`WorkingDirectory` lines).
/// 3. A relative command with no blueprint in effect is resolved against
///    the working directory.
pub fn render_unit(service: &Service, blueprints: &Registry) -> String {
    if !service.systemd_raw.is_empty() {
        debug!(service = %service.name, "using raw systemd override");
        return service.systemd_raw.clone();
    }

    let mut command = service.command.clone();
    let mut environment = service.environment.clone();
    let mut overrides = String::new();
    let mut has_blueprint = false;

    if !service.kind.is_empty() {
        if let Some(bp) = blueprints.get(&service.kind) {
            has_blueprint = true;

            if command.is_empty() {
                command = bp.generate_command(service);
            }

            let blueprint_env = bp.generate_environment(service);
            if !blueprint_env.is_empty() {
                environment = if environment.is_empty() {
                    blueprint_env
                } else {
                    format!("{blueprint_env}\n{environment}")
                };
            }

            overrides = bp.generate_overrides(service);
        }
    }

    let restart = if service.auto_restart {
        "on-failure"
    } else {
        "no"
    };
    let working_dir = if service.working_dir.is_empty() {
        "/"
    } else {
        &service.working_dir
    };
    let user = if service.user.is_empty() {
        "root"
    } else {
        &service.user
    };

    // Resolve a relative executable against the working directory, but
    // only when no blueprint supplied the command.
    if !has_blueprint {
        if let Some(exe) = command.split_whitespace().next() {
            if !exe.starts_with('/') {
                let absolute = Path::new(working_dir).join(exe);
                command = command.replacen(exe, &absolute.to_string_lossy(), 1);
            }
        }
    }

    let mut env_section = String::new();
    for line in environment.lines() {
        let line = line.trim();
        if !line.is_empty() && line.contains('=') {
            env_section.push_str(&format!("Environment=\"{line}\"\n"));
        }
    }

    let mut unit = String::new();
    unit.push_str("[Unit]\n");
    unit.push_str(&format!("Description=Managed Service: {}\n", service.name));
    unit.push_str("After=network.target\n\n");

    if overrides.is_empty() {
        unit.push_str("[Service]\n");
        unit.push_str("Type=simple\n");
        unit.push_str(&format!("User={user}\n"));
        unit.push_str(&format!("WorkingDirectory={working_dir}\n"));
    } else {
        unit.push_str(&overrides);
        if !overrides.ends_with('\n') {
            unit.push('\n');
        }
    }

    unit.push_str(&format!("ExecStart={command}\n"));
    unit.push_str(&format!("Restart={restart}\n"));
    unit.push_str("RestartSec=5\n");
    unit.push_str("StandardOutput=journal\n");
    unit.push_str("StandardError=journal\n");
    unit.push_str(&format!("SyslogIdentifier=servio-{}\n", service.name));
    unit.push_str(&env_section);
    unit.push_str("\n[Install]\nWantedBy=multi-user.target\n");

    unit
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use servio_core::Service;

    fn service(name: &str) -> Service {
        Service {
            id: 1,
            project_id: 1,
            name: name.to_string(),
            kind: String::new(),
            version: String::new(),
            port: 0,
            git_repo_url: String::new(),
            command: "/usr/bin/true".to_string(),
            working_dir: String::new(),
            user: String::new(),
            environment: String::new(),
            auto_restart: false,
            config: String::new(),
            systemd_raw: String::new(),
            nginx_raw: String::new(),
            created_at: NaiveDateTime::default(),
            updated_at: NaiveDateTime::default(),
            status: String::new(),
        }
    }

    #[test]
    fn identical_services_render_identical_units() {
        let registry = Registry::new();
        let a = render_unit(&service("web"), &registry);
        let b = render_unit(&service("web"), &registry);
        assert_eq!(a, b);
    }

    #[test]
    fn minimal_service_gets_defaults() {
        let registry = Registry::new();
        let unit = render_unit(&service("web"), &registry);

        assert!(unit.contains("Description=Managed Service: web\n"));
        assert!(unit.contains("User=root\n"));
        assert!(unit.contains("WorkingDirectory=/\n"));
        assert!(unit.contains("ExecStart=/usr/bin/true\n"));
        assert!(unit.contains("Restart=no\n"));
        assert!(unit.contains("SyslogIdentifier=servio-web\n"));
        assert!(unit.contains("WantedBy=multi-user.target\n"));
    }

    #[test]
    fn auto_restart_selects_on_failure() {
        let registry = Registry::new();
        let mut svc = service("web");
        svc.auto_restart = true;
        let unit = render_unit(&svc, &registry);
        assert!(unit.contains("Restart=on-failure\n"));
    }

    #[test]
    fn raw_override_is_returned_verbatim() {
        let registry = Registry::new();
        let mut svc = service("web");
        svc.kind = "postgres".to_string();
        svc.auto_restart = true;
        svc.environment = "FOO=bar".to_string();
        svc.systemd_raw = "[Unit]\nDescription=hand written\n".to_string();

        let unit = render_unit(&svc, &registry);
        assert_eq!(unit, "[Unit]\nDescription=hand written\n");
    }

    #[test]
    fn empty_command_falls_back_to_blueprint() {
        let registry = Registry::new();
        let mut svc = service("db");
        svc.kind = "postgres".to_string();
        svc.command = String::new();

        let expected = registry.get("postgres").unwrap().generate_command(&svc);
        let unit = render_unit(&svc, &registry);
        assert!(unit.contains(&format!("ExecStart={expected}\n")));
    }

    #[test]
    fn postgres_config_flows_into_command_and_environment() {
        let registry = Registry::new();
        let mut svc = service("db");
        svc.kind = "postgres".to_string();
        svc.command = String::new();
        svc.config = r#"{"db_port":6543,"max_connections":200}"#.to_string();

        let unit = render_unit(&svc, &registry);
        assert!(unit.contains(" -p 6543"));
        assert!(unit.contains(" -c max_connections=200"));
        assert!(unit.contains("Environment=\"PGPORT=6543\"\n"));
        // Blueprint overrides replace the default [Service] preamble.
        assert!(unit.contains("Type=notify\n"));
        assert!(unit.contains("OOMScoreAdjust=-1000\n"));
        assert!(!unit.contains("Type=simple"));
    }

    #[test]
    fn relative_command_resolves_against_working_dir() {
        let registry = Registry::new();
        let mut svc = service("web");
        svc.command = "run.sh --flag".to_string();
        svc.working_dir = "/srv/app".to_string();

        let unit = render_unit(&svc, &registry);
        assert!(unit.contains("ExecStart=/srv/app/run.sh --flag\n"));
    }

    #[test]
    fn blueprint_command_is_not_re_resolved() {
        let registry = Registry::new();
        let mut svc = service("app");
        svc.kind = "django".to_string();
        svc.command = String::new();
        svc.working_dir = "/srv/app".to_string();

        // Gunicorn without a venv is a bare command name; a blueprint is
        // in effect so it must stay unresolved.
        let unit = render_unit(&svc, &registry);
        assert!(unit.contains("ExecStart=gunicorn "));
    }

    #[test]
    fn environment_merges_blueprint_first_and_skips_blanks() {
        let registry = Registry::new();
        let mut svc = service("db");
        svc.kind = "postgres".to_string();
        svc.command = String::new();
        svc.environment = "EXTRA=1\n\nnot-a-pair\n".to_string();

        let unit = render_unit(&svc, &registry);
        let pgdata = unit.find("Environment=\"PGDATA=").unwrap();
        let extra = unit.find("Environment=\"EXTRA=1\"").unwrap();
        assert!(pgdata < extra, "blueprint environment comes first");
        assert!(!unit.contains("not-a-pair"));
    }
}
