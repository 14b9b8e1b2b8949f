//! API-surface tests: the full router driven through `oneshot`, backed
//! by an in-memory store, a scratch unit directory, and `true` stand-ins
//! for systemctl/nginx so no real host state is touched.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use servio_core::Service;
use servio_server::blueprints::{Blueprint, BlueprintDefaults, BlueprintMetadata, Registry};
use servio_server::config::Credentials;
use servio_server::monitor::Monitor;
use servio_server::nginx::NginxManager;
use servio_server::state::AppState;
use servio_server::store::SqliteStore;
use servio_server::systemd::SystemdManager;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct TestApp {
    router: Router,
    unit_dir: PathBuf,
    _tmp: TempDir,
}

async fn test_app() -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let unit_dir = tmp.path().join("units");
    std::fs::create_dir_all(&unit_dir).unwrap();

    let store = SqliteStore::open(":memory:").await.unwrap();
    let blueprints = Arc::new(Registry::new());
    let systemd = Arc::new(SystemdManager::with_paths(
        blueprints.clone(),
        &unit_dir,
        "true",
        "true",
    ));
    let nginx = Arc::new(NginxManager::with_layout(
        tmp.path().join("conf.d"),
        None,
        vec!["true".to_string()],
        vec!["true".to_string()],
    ));

    let state = AppState {
        store,
        systemd,
        blueprints,
        nginx,
        monitor: Arc::new(Monitor::new()),
        credentials: Arc::new(Credentials {
            username: "admin".to_string(),
            password: "servio".to_string(),
        }),
    };

    TestApp {
        router: servio_server::api::router(state),
        unit_dir,
        _tmp: tmp,
    }
}

fn auth_header() -> String {
    format!("Basic {}", STANDARD.encode("admin:servio"))
}

async fn request(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, auth_header());

    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn unit_path(app: &TestApp, name: &str) -> PathBuf {
    Path::new(&app.unit_dir).join(format!("servio-{name}.service"))
}

#[tokio::test]
async fn requests_without_credentials_are_rejected() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/projects")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn project_crud_roundtrip() {
    let app = test_app().await;

    let (status, project) = request(
        &app.router,
        "POST",
        "/api/projects",
        Some(json!({"name": "alpha", "description": "first"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(project["name"], "alpha");
    let id = project["id"].as_i64().unwrap();

    // Duplicate names conflict.
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/projects",
        Some(json!({"name": "alpha"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    // Missing name is a validation error.
    let (status, _) = request(&app.router, "POST", "/api/projects", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, listed) = request(&app.router, "GET", "/api/projects", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, updated) = request(
        &app.router,
        "PUT",
        &format!("/api/projects/{id}"),
        Some(json!({"name": "alpha", "description": "renamed", "domain": "alpha.example"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["domain"], "alpha.example");

    let (status, _) = request(&app.router, "GET", "/api/projects/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn creating_a_service_installs_its_unit() {
    let app = test_app().await;

    let (_, project) = request(
        &app.router,
        "POST",
        "/api/projects",
        Some(json!({"name": "alpha"})),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();

    let (status, service) = request(
        &app.router,
        "POST",
        "/api/services",
        Some(json!({
            "project_id": project_id,
            "name": "web",
            "type": "custom",
            "command": "/usr/bin/true",
            "user": "root",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(service["type"], "custom");
    let service_id = service["id"].as_i64().unwrap();

    let unit = std::fs::read_to_string(unit_path(&app, "web")).unwrap();
    assert!(unit.contains("ExecStart=/usr/bin/true\n"));
    assert!(unit.contains("Restart=no\n"));

    // The unit file exists but is inactive under the fake systemctl.
    let (status, fetched) = request(
        &app.router,
        "GET",
        &format!("/api/services/{service_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "stopped");
}

#[tokio::test]
async fn service_creation_validates_input() {
    let app = test_app().await;

    let (_, project) = request(
        &app.router,
        "POST",
        "/api/projects",
        Some(json!({"name": "alpha"})),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();

    // Unknown project.
    let (status, _) = request(
        &app.router,
        "POST",
        "/api/services",
        Some(json!({"project_id": 999, "name": "web", "command": "/usr/bin/true"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Bad git URL.
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/services",
        Some(json!({
            "project_id": project_id,
            "name": "web",
            "command": "/usr/bin/true",
            "git_repo_url": "not-a-url",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("git"));

    // project_id is required when listing.
    let (status, _) = request(&app.router, "GET", "/api/services", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_a_project_uninstalls_every_unit() {
    let app = test_app().await;

    let (_, project) = request(
        &app.router,
        "POST",
        "/api/projects",
        Some(json!({"name": "alpha"})),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();

    for name in ["web", "worker"] {
        request(
            &app.router,
            "POST",
            "/api/services",
            Some(json!({
                "project_id": project_id,
                "name": name,
                "type": "custom",
                "command": "/usr/bin/true",
            })),
        )
        .await;
    }
    assert!(unit_path(&app, "web").exists());
    assert!(unit_path(&app, "worker").exists());

    let (status, _) = request(
        &app.router,
        "DELETE",
        &format!("/api/projects/{project_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(!unit_path(&app, "web").exists());
    assert!(!unit_path(&app, "worker").exists());

    let (status, _) = request(
        &app.router,
        "GET",
        &format!("/api/projects/{project_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, services) = request(
        &app.router,
        "GET",
        &format!("/api/services?project_id={project_id}"),
        None,
    )
    .await;
    assert_eq!(services.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn updating_a_blueprint_service_clears_a_matching_command() {
    let app = test_app().await;

    let (_, project) = request(
        &app.router,
        "POST",
        "/api/projects",
        Some(json!({"name": "alpha"})),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();

    let generated = "/usr/bin/postgres -D /var/lib/pgsql/data";
    let (_, service) = request(
        &app.router,
        "POST",
        "/api/services",
        Some(json!({
            "project_id": project_id,
            "name": "db",
            "type": "postgres",
            "version": "16",
            "port": 5432,
            "command": generated,
            "user": "root",
        })),
    )
    .await;
    let service_id = service["id"].as_i64().unwrap();

    // Submitting the command unchanged while bumping the port: it still
    // matches what the blueprint generates, so it is cleared.
    let (status, updated) = request(
        &app.router,
        "PUT",
        &format!("/api/services/{service_id}"),
        Some(json!({
            "name": "db",
            "port": 6000,
            "command": generated,
            "user": "root",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["command"], "");

    // A hand-customized command survives the update.
    let (status, updated) = request(
        &app.router,
        "PUT",
        &format!("/api/services/{service_id}"),
        Some(json!({
            "name": "db",
            "port": 6000,
            "command": "/usr/bin/postgres -D /custom/data",
            "user": "root",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["command"], "/usr/bin/postgres -D /custom/data");
}

/// A blueprint whose dependency install always succeeds, so provision
/// tests exercise the unit install / enable / start chain without
/// running a package manager.
struct StubBlueprint;

#[async_trait]
impl Blueprint for StubBlueprint {
    fn kind(&self) -> &'static str {
        "stub"
    }

    fn metadata(&self) -> BlueprintMetadata {
        BlueprintMetadata {
            kind: "stub",
            display_name: "Stub",
            description: "Test-only blueprint with no host dependencies",
            icon: "*",
            versions: &["1"],
            default_version: "1",
        }
    }

    fn defaults(&self, _version: &str) -> BlueprintDefaults {
        BlueprintDefaults {
            command: "/usr/bin/true".to_string(),
            user: "root".to_string(),
            working_dir: String::new(),
            hint: String::new(),
        }
    }

    fn generate_command(&self, _service: &Service) -> String {
        "/usr/bin/true".to_string()
    }

    fn generate_environment(&self, _service: &Service) -> String {
        String::new()
    }

    fn generate_overrides(&self, _service: &Service) -> String {
        String::new()
    }

    async fn install_dependencies(&self, _version: &str) -> servio_core::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn provision_short_circuits_when_enable_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let unit_dir = tmp.path().join("units");
    std::fs::create_dir_all(&unit_dir).unwrap();

    // systemctl stand-in: `enable` fails, `start` leaves evidence, every
    // other verb succeeds.
    let started = tmp.path().join("started");
    let systemctl = tmp.path().join("fake-systemctl");
    std::fs::write(
        &systemctl,
        format!(
            "#!/bin/sh\ncase \"$1\" in\n  enable) exit 1 ;;\n  start) echo started >> {} ;;\nesac\nexit 0\n",
            started.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&systemctl, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut registry = Registry::new();
    registry.register(Box::new(StubBlueprint));
    let blueprints = Arc::new(registry);

    let systemd = Arc::new(SystemdManager::with_paths(
        blueprints.clone(),
        &unit_dir,
        systemctl.to_str().unwrap(),
        "true",
    ));
    let state = AppState {
        store: SqliteStore::open(":memory:").await.unwrap(),
        systemd,
        blueprints,
        nginx: Arc::new(NginxManager::with_layout(
            tmp.path().join("conf.d"),
            None,
            vec!["true".to_string()],
            vec!["true".to_string()],
        )),
        monitor: Arc::new(Monitor::new()),
        credentials: Arc::new(Credentials {
            username: "admin".to_string(),
            password: "servio".to_string(),
        }),
    };
    let router = servio_server::api::router(state);

    let (_, project) = request(
        &router,
        "POST",
        "/api/projects",
        Some(json!({"name": "alpha"})),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();

    let (_, service) = request(
        &router,
        "POST",
        "/api/services",
        Some(json!({
            "project_id": project_id,
            "name": "web",
            "type": "stub",
            "command": "/usr/bin/true",
        })),
    )
    .await;
    let service_id = service["id"].as_i64().unwrap();

    let (status, body) = request(
        &router,
        "POST",
        &format!("/api/services/{service_id}/provision"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("enable"));
    assert!(!started.exists(), "start must not run after a failed enable");

    // An unmanaged type cannot be provisioned at all.
    let (_, custom) = request(
        &router,
        "POST",
        "/api/services",
        Some(json!({
            "project_id": project_id,
            "name": "plain",
            "type": "custom",
            "command": "/usr/bin/true",
        })),
    )
    .await;
    let custom_id = custom["id"].as_i64().unwrap();

    let (status, body) = request(
        &router,
        "POST",
        &format!("/api/services/{custom_id}/provision"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("blueprint"));
}

#[tokio::test]
async fn blueprint_listing_and_defaults() {
    let app = test_app().await;

    let (status, metas) = request(&app.router, "GET", "/api/blueprints", None).await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = metas
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["django", "postgres", "redis"]);

    let (status, defaults) = request(
        &app.router,
        "GET",
        "/api/blueprints?type=postgres&version=15",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(defaults["user"], "postgres");
    assert!(defaults["hint"].as_str().unwrap().contains("15"));

    let (status, _) = request(&app.router, "GET", "/api/blueprints?type=mongodb", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn nginx_preview_and_deploy() {
    let app = test_app().await;

    let (_, project) = request(
        &app.router,
        "POST",
        "/api/projects",
        Some(json!({"name": "alpha"})),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();

    // No domain: preview and deploy both refuse.
    let (status, _) = request(
        &app.router,
        "GET",
        &format!("/api/nginx/{project_id}/preview"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/api/nginx/{project_id}/deploy"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // With a domain the full preview/deploy/remove cycle works.
    request(
        &app.router,
        "PUT",
        &format!("/api/projects/{project_id}"),
        Some(json!({"name": "alpha", "domain": "alpha.example"})),
    )
    .await;

    let (status, preview) = request(
        &app.router,
        "GET",
        &format!("/api/nginx/{project_id}/preview"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["installed"], false);
    assert_eq!(preview["is_customized"], false);
    assert!(preview["config"]
        .as_str()
        .unwrap()
        .contains("server_name alpha.example;"));

    let (status, deployed) = request(
        &app.router,
        "POST",
        &format!("/api/nginx/{project_id}/deploy"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deployed["status"], "deployed");

    let (_, preview) = request(
        &app.router,
        "GET",
        &format!("/api/nginx/{project_id}/preview"),
        None,
    )
    .await;
    assert_eq!(preview["installed"], true);

    let (status, removed) = request(
        &app.router,
        "POST",
        &format!("/api/nginx/{project_id}/remove"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed["status"], "removed");
}

#[tokio::test]
async fn saving_a_raw_site_override_customizes_the_preview() {
    let app = test_app().await;

    let (_, project) = request(
        &app.router,
        "POST",
        "/api/projects",
        Some(json!({"name": "alpha", "domain": "alpha.example"})),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();

    let (status, saved) = request(
        &app.router,
        "POST",
        &format!("/api/nginx/{project_id}/save"),
        Some(json!({"config": "server { listen 8080; }"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["status"], "saved");

    let (_, preview) = request(
        &app.router,
        "GET",
        &format!("/api/nginx/{project_id}/preview"),
        None,
    )
    .await;
    assert_eq!(preview["is_customized"], true);
    assert_eq!(preview["config"], "server { listen 8080; }");
}

#[tokio::test]
async fn settings_accept_json_and_form_bodies() {
    let app = test_app().await;

    let (status, _) = request(
        &app.router,
        "POST",
        "/api/settings/distro",
        Some(json!({"value": "ubuntu"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Form body naming the key directly, the way the UI posts it.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/settings/distro")
                .header(header::AUTHORIZATION, auth_header())
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("distro=rhel"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Missing value is rejected.
    let (status, _) = request(&app.router, "POST", "/api/settings/distro", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
