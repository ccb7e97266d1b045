use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JVM memory bounds plus free-form extra arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JavaArgs {
    pub xmx: String,
    pub xms: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Instance descriptor, persisted as `instance.json` in the instance
/// directory. The id is a filesystem-safe slug derived from the display
/// name once at creation and never changed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub id: String,
    pub name: String,
    pub jar_file: String,
    pub java_args: JavaArgs,
    pub rcon_port: u16,
    pub rcon_password: String,
    #[serde(default)]
    pub auto_restart: bool,
    pub created: DateTime<Utc>,
}

/// Derives the instance id from a display name: lowercased, every
/// character outside `[a-z0-9]` replaced with `-`.
pub fn slug_id(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect()
}
