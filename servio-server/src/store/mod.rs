//! SQLite-backed persistence for projects, services, and settings.
//!
//! The store hands out one logical connection (WAL-journaled, foreign
//! keys enforced) and exposes per-call operations only; compound
//! workflows are composed by the handlers. Engine errors never escape
//! raw: they are wrapped with a message naming the failing operation,
//! except uniqueness violations which surface as [`Error::Conflict`].

mod migrations;

use servio_core::{
    CreateProjectRequest, CreateServiceRequest, Error, Project, Result, Service,
    UpdateProjectRequest, UpdateServiceRequest,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

const PROJECT_COLS: &str = "id, name, COALESCE(description, '') AS description, \
     COALESCE(domain, '') AS domain, COALESCE(nginx_raw, '') AS nginx_raw, \
     created_at, updated_at";

const SERVICE_COLS: &str = "id, project_id, name, type, \
     COALESCE(version, '') AS version, COALESCE(port, 0) AS port, \
     COALESCE(git_repo_url, '') AS git_repo_url, command, \
     COALESCE(working_dir, '') AS working_dir, COALESCE(user, 'root') AS user, \
     COALESCE(environment, '') AS environment, \
     COALESCE(auto_restart, 1) AS auto_restart, COALESCE(config, '') AS config, \
     COALESCE(systemd_raw, '') AS systemd_raw, COALESCE(nginx_raw, '') AS nginx_raw, \
     created_at, updated_at";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if necessary) the database at `path`, enables WAL
    /// journaling and foreign-key enforcement, and applies migrations.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| Error::internal("failed to open database", e))?;

        migrations::run(&pool).await?;
        info!(path, "database ready");

        Ok(Self { pool })
    }

    // --- Projects ---

    pub async fn create_project(&self, req: &CreateProjectRequest) -> Result<Project> {
        let result = sqlx::query("INSERT INTO projects (name, description, domain) VALUES (?, ?, ?)")
            .bind(&req.name)
            .bind(&req.description)
            .bind(&req.domain)
            .execute(&self.pool)
            .await
            .map_err(|e| classify("failed to create project", e))?;

        let id = result.last_insert_rowid();
        self.get_project(id)
            .await?
            .ok_or_else(|| Error::Internal("project missing after insert".to_string()))
    }

    /// Fetches a project with its services attached (ordered by name).
    pub async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLS} FROM projects WHERE id = ?");
        let project: Option<Project> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::internal("failed to get project", e))?;

        match project {
            Some(mut p) => {
                p.services = self.list_services_by_project(p.id).await?;
                Ok(Some(p))
            }
            None => Ok(None),
        }
    }

    pub async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLS} FROM projects WHERE name = ?");
        let project: Option<Project> = sqlx::query_as(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::internal("failed to get project by name", e))?;

        match project {
            Some(mut p) => {
                p.services = self.list_services_by_project(p.id).await?;
                Ok(Some(p))
            }
            None => Ok(None),
        }
    }

    /// Lists all projects ordered by name. Services are not attached.
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let sql = format!("SELECT {PROJECT_COLS} FROM projects ORDER BY name ASC");
        sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::internal("failed to list projects", e))
    }

    pub async fn update_project(&self, id: i64, req: &UpdateProjectRequest) -> Result<Project> {
        sqlx::query(
            "UPDATE projects SET name = ?, description = ?, domain = ?, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(&req.name)
        .bind(&req.description)
        .bind(&req.domain)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify("failed to update project", e))?;

        self.get_project(id).await?.ok_or(Error::NotFound {
            entity: "project",
            id,
        })
    }

    /// Isolated mutator for the verbatim site override.
    pub async fn update_project_nginx_raw(&self, id: i64, nginx_raw: &str) -> Result<Project> {
        sqlx::query(
            "UPDATE projects SET nginx_raw = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(nginx_raw)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::internal("failed to update nginx config", e))?;

        self.get_project(id).await?.ok_or(Error::NotFound {
            entity: "project",
            id,
        })
    }

    /// Deletes a project; services cascade via the foreign key.
    pub async fn delete_project(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::internal("failed to delete project", e))?;
        Ok(())
    }

    // --- Services ---

    pub async fn create_service(&self, req: &CreateServiceRequest) -> Result<Service> {
        let user = if req.user.is_empty() { "root" } else { &req.user };

        let result = sqlx::query(
            "INSERT INTO services (project_id, name, type, version, port, git_repo_url, \
             command, working_dir, user, environment, auto_restart, config, systemd_raw, nginx_raw) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(req.project_id)
        .bind(&req.name)
        .bind(&req.kind)
        .bind(&req.version)
        .bind(req.port)
        .bind(&req.git_repo_url)
        .bind(&req.command)
        .bind(&req.working_dir)
        .bind(user)
        .bind(&req.environment)
        .bind(req.auto_restart)
        .bind(&req.config)
        .bind(&req.systemd_raw)
        .bind(&req.nginx_raw)
        .execute(&self.pool)
        .await
        .map_err(|e| classify("failed to create service", e))?;

        let id = result.last_insert_rowid();
        self.get_service(id)
            .await?
            .ok_or_else(|| Error::Internal("service missing after insert".to_string()))
    }

    pub async fn get_service(&self, id: i64) -> Result<Option<Service>> {
        let sql = format!("SELECT {SERVICE_COLS} FROM services WHERE id = ?");
        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::internal("failed to get service", e))
    }

    pub async fn list_services_by_project(&self, project_id: i64) -> Result<Vec<Service>> {
        let sql = format!("SELECT {SERVICE_COLS} FROM services WHERE project_id = ? ORDER BY name ASC");
        sqlx::query_as(&sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::internal("failed to list services", e))
    }

    pub async fn update_service(&self, id: i64, req: &UpdateServiceRequest) -> Result<Service> {
        let user = if req.user.is_empty() { "root" } else { &req.user };

        sqlx::query(
            "UPDATE services SET name = ?, port = ?, git_repo_url = ?, command = ?, \
             working_dir = ?, user = ?, environment = ?, auto_restart = ?, config = ?, \
             systemd_raw = ?, nginx_raw = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(&req.name)
        .bind(req.port)
        .bind(&req.git_repo_url)
        .bind(&req.command)
        .bind(&req.working_dir)
        .bind(user)
        .bind(&req.environment)
        .bind(req.auto_restart)
        .bind(&req.config)
        .bind(&req.systemd_raw)
        .bind(&req.nginx_raw)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify("failed to update service", e))?;

        self.get_service(id).await?.ok_or(Error::NotFound {
            entity: "service",
            id,
        })
    }

    pub async fn delete_service(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::internal("failed to delete service", e))?;
        Ok(())
    }

    // --- Settings ---

    /// Returns the stored value, or the empty string when the key is unset.
    pub async fn get_setting(&self, key: &str) -> Result<String> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::internal("failed to get setting", e))?;
        Ok(value.unwrap_or_default())
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::internal("failed to set setting", e))?;
        Ok(())
    }
}

/// Maps uniqueness violations to [`Error::Conflict`]; everything else is
/// wrapped as an internal error naming the failing operation.
fn classify(context: &str, err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.message().contains("UNIQUE constraint failed") {
            return Error::Conflict(format!("{context}: {}", db.message()));
        }
    }
    Error::internal(context, err)
}
