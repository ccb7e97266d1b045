use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the managed instance. Exactly one value at a time;
/// only the supervisor's transition functions change it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Offline,
    Starting,
    Online,
    Stopping,
    Restarting,
    Crashed,
}

impl InstanceState {
    pub fn is_running(self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::Online | InstanceState::Restarting
        )
    }
}

/// Snapshot of the supervisor returned by `get_status` and published on
/// the status stream after every transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub running: bool,
    pub state: InstanceState,
    pub active_id: Option<String>,
    pub name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}
