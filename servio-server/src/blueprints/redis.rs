use async_trait::async_trait;
use servio_core::{Result, Service};
use tracing::info;

use super::{install_package, Blueprint, BlueprintDefaults, BlueprintMetadata};

const VERSIONS: &[&str] = &["7", "6"];
const DEFAULT_VERSION: &str = "7";
const COMMAND: &str = "/usr/bin/redis-server /etc/redis/redis.conf";

/// Blueprint for Redis services.
pub struct RedisBlueprint;

#[async_trait]
impl Blueprint for RedisBlueprint {
    fn kind(&self) -> &'static str {
        "redis"
    }

    fn metadata(&self) -> BlueprintMetadata {
        BlueprintMetadata {
            kind: "redis",
            display_name: "Redis",
            description: "In-memory data structure store for caching and messaging",
            icon: "🔴",
            versions: VERSIONS,
            default_version: DEFAULT_VERSION,
        }
    }

    fn defaults(&self, _version: &str) -> BlueprintDefaults {
        BlueprintDefaults {
            command: COMMAND.to_string(),
            user: "redis".to_string(),
            working_dir: "/var/lib/redis".to_string(),
            hint: "Redis with default configuration file.".to_string(),
        }
    }

    fn generate_command(&self, _service: &Service) -> String {
        COMMAND.to_string()
    }

    fn generate_environment(&self, _service: &Service) -> String {
        String::new()
    }

    fn generate_overrides(&self, _service: &Service) -> String {
        "[Service]\n\
         Type=notify\n\
         User=redis\n\
         Group=redis\n\
         RuntimeDirectory=redis\n\
         RuntimeDirectoryMode=0755\n\
         LimitNOFILE=65535"
            .to_string()
    }

    async fn install_dependencies(&self, version: &str) -> Result<()> {
        let version = if version.is_empty() {
            DEFAULT_VERSION
        } else {
            version
        };
        info!(version, "installing Redis");
        install_package("redis", "redis-server").await?;
        Ok(())
    }
}
