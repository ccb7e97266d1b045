use std::path::PathBuf;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::storage::file::{AtomicFileIo, Config};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("daemon"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaConfig {
    pub path: String,
}

impl Default for JavaConfig {
    fn default() -> Self {
        Self {
            path: "java".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Unintended exits tolerated before auto-restart gives up.
    pub crash_limit: u32,
    pub respawn_delay_secs: u64,
    /// Total graceful-stop wait before escalating to a forced kill.
    pub stop_timeout_secs: u64,
    pub settle_delay_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            crash_limit: 3,
            respawn_delay_secs: 5,
            stop_timeout_secs: 10,
            settle_delay_secs: 3,
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub connect_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            retry_delay_secs: 2,
        }
    }
}

/// Metadata surfaced in the public status snapshot; the descriptor layout
/// carries neither field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub version: String,
    pub core_type: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            version: String::new(),
            core_type: "vanilla".to_string(),
        }
    }
}

/// immutable through full lifetime of app, unless restart app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub java: JavaConfig,
    pub lifecycle: LifecycleConfig,
    pub control: ControlConfig,
    pub query: QueryConfig,
}

impl AtomicFileIo for AppConfig {}

impl Config for AppConfig {
    type ConfigType = AppConfig;
}

impl AppConfig {
    fn load() -> AppConfig {
        Self::load_config_or_default("config.json", Self::default).unwrap_or_default()
    }
}

static APP_CONFIG: LazyLock<AppConfig> = LazyLock::new(AppConfig::load);

impl AppConfig {
    pub fn get() -> &'static AppConfig {
        &APP_CONFIG
    }
}
