use clap::Parser;

/// Daemon configuration, loaded from flags with `SERVIO_*` environment
/// fallbacks. A `.env` file in the working directory is honored.
#[derive(Debug, Clone, Parser)]
#[command(name = "servio", about = "Self-hosted control plane for systemd services")]
pub struct Config {
    /// HTTP listen address.
    #[arg(long, env = "SERVIO_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: String,

    /// SQLite database path.
    #[arg(long = "db", env = "SERVIO_DB", default_value = "servio.db")]
    pub db_path: String,

    /// Log level (debug, info, warn, error).
    #[arg(long, env = "SERVIO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// HTTP basic-auth credentials guarding the whole surface.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Reads credentials from the environment, falling back to the
    /// well-known defaults the operator is expected to change.
    pub fn from_env() -> Self {
        Self {
            username: std::env::var("SERVIO_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            password: std::env::var("SERVIO_PASSWORD").unwrap_or_else(|_| "servio".to_string()),
        }
    }
}
