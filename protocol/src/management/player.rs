use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which source first produced a record during one aggregation pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerSource {
    Cache,
    Ops,
    Banned,
    Whitelist,
    Live,
}

/// Unified player view built fresh on every aggregation pass. `id` is the
/// stable UUID string from the on-disk sources, or a `live:<name>` marker
/// synthesized for a connected player with no static record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: String,
    pub name: String,
    pub online: bool,
    pub op: bool,
    pub banned: bool,
    pub whitelisted: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub source: PlayerSource,
    pub linked: Option<String>,
}

impl PlayerRecord {
    pub fn new(id: String, name: String, source: PlayerSource) -> Self {
        Self {
            id,
            name,
            online: false,
            op: false,
            banned: false,
            whitelisted: false,
            last_seen: None,
            source,
            linked: None,
        }
    }
}

/// Administrative actions on a single player, mapped to console commands
/// by the supervisor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerAction {
    Kick,
    Ban,
    Pardon,
    Op,
    Deop,
    WhitelistAdd,
    WhitelistRemove,
}
