use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::management::instance::InstanceState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayersSummary {
    pub online: u32,
    pub max: u32,
    pub list: Vec<String>,
}

/// Publicly readable status snapshot, rewritten after every roster
/// aggregation and every state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicStatus {
    pub name: String,
    pub motd: String,
    pub status: InstanceState,
    pub version: String,
    pub core_type: String,
    pub players: PlayersSummary,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    use super::*;

    #[test]
    fn snapshot_layout() {
        let snapshot = PublicStatus {
            name: "Survival".into(),
            motd: "A Minecraft Server".into(),
            status: InstanceState::Online,
            version: "1.21".into(),
            core_type: "vanilla".into(),
            players: PlayersSummary {
                online: 1,
                max: 20,
                list: vec!["steve".into()],
            },
            last_updated: "2024-05-01T12:00:00Z".parse().unwrap(),
        };
        let expected = r#"{
            "name": "Survival",
            "motd": "A Minecraft Server",
            "status": "online",
            "version": "1.21",
            "coreType": "vanilla",
            "players": {"online": 1, "max": 20, "list": ["steve"]},
            "lastUpdated": "2024-05-01T12:00:00Z"
        }"#;
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            serde_json::from_str::<Value>(expected).unwrap()
        );
    }
}
