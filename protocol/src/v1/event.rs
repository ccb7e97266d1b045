use serde::Serialize;

use crate::management::instance::{LogEntry, StatusSummary};

/// Events fanned out to transport subscribers: one per new console line,
/// one per lifecycle transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Events {
    InstanceLog { data: LogEntry },
    InstanceStatus { data: StatusSummary },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventPacket {
    #[serde(flatten)]
    pub event: Events,
    /// Unix millis at emission time.
    pub time: i64,
}

impl EventPacket {
    pub fn new(event: Events, time: i64) -> Self {
        Self { event, time }
    }
}
