//! Forward-only schema migrations, applied on every store open.
//!
//! Each step is guarded by an idempotent probe (table-exists) or tolerates
//! re-application (duplicate-column errors are swallowed), so opening the
//! same database twice performs no destructive change the second time.

use servio_core::{Error, Result};
use sqlx::SqlitePool;

/// The v2 baseline: projects + services + settings with every column the
/// daemon knows about, so a fresh database needs no follow-up ALTERs.
const BASE_SCHEMA: &str = r#"
CREATE TABLE projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    domain TEXT,
    nginx_raw TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE services (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    version TEXT,
    port INTEGER DEFAULT 0,
    git_repo_url TEXT,
    command TEXT NOT NULL,
    working_dir TEXT,
    user TEXT DEFAULT 'root',
    environment TEXT,
    auto_restart INTEGER DEFAULT 1,
    config TEXT,
    systemd_raw TEXT,
    nginx_raw TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE,
    UNIQUE(project_id, name)
);

CREATE TABLE settings (
    key TEXT PRIMARY KEY,
    value TEXT
);
"#;

pub async fn run(pool: &SqlitePool) -> Result<()> {
    if !table_exists(pool, "services").await? {
        if table_exists(pool, "projects").await? {
            // v1 kept everything in a flat projects table. Park it; the
            // operator re-creates projects through the UI.
            sqlx::query("ALTER TABLE projects RENAME TO projects_v1")
                .execute(pool)
                .await
                .map_err(|e| Error::internal("failed to rename v1 projects table", e))?;
        }

        sqlx::raw_sql(BASE_SCHEMA)
            .execute(pool)
            .await
            .map_err(|e| Error::internal("failed to create v2 schema", e))?;
    }

    // Incremental column additions for databases created before the
    // column existed. Re-runs hit "duplicate column name" and are no-ops.
    add_column(pool, "services", "systemd_raw", "TEXT").await?;
    add_column(pool, "services", "nginx_raw", "TEXT").await?;
    add_column(pool, "services", "port", "INTEGER DEFAULT 0").await?;
    add_column(pool, "projects", "domain", "TEXT").await?;
    add_column(pool, "projects", "nginx_raw", "TEXT").await?;

    sqlx::query("CREATE TABLE IF NOT EXISTS settings (key TEXT PRIMARY KEY, value TEXT)")
        .execute(pool)
        .await
        .map_err(|e| Error::internal("failed to create settings table", e))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_projects_name ON projects(name)")
        .execute(pool)
        .await
        .map_err(|e| Error::internal("failed to create projects index", e))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_services_project_id ON services(project_id)")
        .execute(pool)
        .await
        .map_err(|e| Error::internal("failed to create services index", e))?;

    Ok(())
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .map_err(|e| Error::internal("failed to probe schema", e))?;
    Ok(count > 0)
}

async fn add_column(pool: &SqlitePool, table: &str, column: &str, decl: &str) -> Result<()> {
    let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {decl}");
    match sqlx::query(&sql).execute(pool).await {
        Ok(_) => Ok(()),
        Err(e) if is_duplicate_column(&e) => Ok(()),
        Err(e) => Err(Error::internal(
            &format!("failed to add {table}.{column}"),
            e,
        )),
    }
}

fn is_duplicate_column(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("duplicate column name"))
}
