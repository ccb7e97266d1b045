use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::config::{InstanceConfig, JavaArgs};

/// Parameters for creating a new instance. The id is derived from `name`
/// by the supervisor, never supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDraft {
    pub name: String,
    pub jar_file: String,
    pub java_args: JavaArgs,
    pub rcon_port: u16,
    pub rcon_password: String,
    #[serde(default)]
    pub auto_restart: bool,
}

/// Partial settings payload: only present fields are applied. Properties
/// entries replace the matching keys; the file is rewritten in full.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSettings {
    pub java_args: Option<JavaArgs>,
    pub auto_restart: Option<bool>,
    pub rcon_port: Option<u16>,
    pub rcon_password: Option<String>,
    pub properties: Option<BTreeMap<String, String>>,
}

/// Combined settings view returned to callers: the descriptor plus the
/// current server properties map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub instance: InstanceConfig,
    pub properties: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_patch_fields_default_to_none() {
        let patch: InstanceSettings = serde_json::from_str("{\"autoRestart\": false}").unwrap();
        assert_eq!(patch.auto_restart, Some(false));
        assert!(patch.java_args.is_none());
        assert!(patch.properties.is_none());
    }
}
