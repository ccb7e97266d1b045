use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Info,
    Warn,
    Error,
    Chat,
}

impl LogCategory {
    /// Level tag used in the per-instance append log file.
    pub fn as_level(self) -> &'static str {
        match self {
            LogCategory::Info => "INFO",
            LogCategory::Warn => "WARN",
            LogCategory::Error => "ERROR",
            LogCategory::Chat => "CHAT",
        }
    }
}

/// One console line, ANSI-stripped, as kept in the ring buffer and
/// published on the log stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
    pub category: LogCategory,
}
