use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A logical group of services fronted by one public domain.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nginx_raw: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,

    /// Child services, attached by the store on single-project reads.
    #[sqlx(skip)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,
}

/// A single supervised unit under a project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    /// Key into the blueprint registry. May be `custom` or empty for
    /// unmanaged services.
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Port the service listens on; 0 means "no port, not routable".
    pub port: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_repo_url: String,
    pub command: String,
    pub working_dir: String,
    pub user: String,
    /// Newline-separated `KEY=VALUE` lines.
    pub environment: String,
    pub auto_restart: bool,
    /// Opaque JSON interpreted by the blueprint for this service type.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config: String,
    /// Operator-supplied verbatim unit text. When non-empty the unit
    /// synthesizer returns it unchanged.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub systemd_raw: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nginx_raw: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,

    /// Runtime status derived from the supervisor; never persisted.
    #[sqlx(skip)]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

impl Service {
    /// The supervisor unit name for this service.
    pub fn unit_name(&self) -> String {
        format!("servio-{}.service", self.name)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CreateServiceRequest {
    pub project_id: i64,
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub git_repo_url: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub working_dir: String,
    /// Defaults to `root` when empty.
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub config: String,
    #[serde(default)]
    pub systemd_raw: String,
    #[serde(default)]
    pub nginx_raw: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateServiceRequest {
    pub name: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub git_repo_url: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub config: String,
    #[serde(default)]
    pub systemd_raw: String,
    #[serde(default)]
    pub nginx_raw: String,
}
