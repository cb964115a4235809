use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::logic::history::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub editor: EditorConfig,
    pub reference: ReferenceConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Maximum number of undoable actions kept
    pub history_limit: usize,
    /// Name of the grouping table in the connected model
    pub table_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// How long the instrument list is trusted before it is re-read
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub load_seed_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            table_name: "Grouping".to_string(),
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            load_seed_data: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional config file and the environment
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("config").required(false));

        // e.g. GROUPING_SERVER__PORT=8080
        config = config.add_source(
            config::Environment::with_prefix("GROUPING")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn reference_ttl(&self) -> Duration {
        Duration::from_secs(self.reference.ttl_secs)
    }
}
