use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

use craftd_protocol::management::instance::{LogCategory, LogEntry};

/// In-memory retention cap; oldest entries are evicted first.
pub const LOG_BUFFER_CAP: usize = 500;

lazy_static! {
    static ref LEVEL_PATTERN: Regex = Regex::new(r"\[[^\]]*/(INFO|WARN|ERROR|FATAL)\]")
        .expect("Failed to compile LEVEL_PATTERN regex");
    static ref CHAT_PATTERN: Regex =
        Regex::new(r"\]: <[^>]+> ").expect("Failed to compile CHAT_PATTERN regex");
}

/// Guesses the category of a console line from the vanilla log format.
pub fn categorize(line: &str) -> LogCategory {
    if CHAT_PATTERN.is_match(line) || line.starts_with('<') {
        return LogCategory::Chat;
    }
    match LEVEL_PATTERN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
    {
        Some("WARN") => LogCategory::Warn,
        Some("ERROR") | Some("FATAL") => LogCategory::Error,
        _ => LogCategory::Info,
    }
}

struct LogBuffer {
    lines: VecDeque<LogEntry>,
}

impl LogBuffer {
    fn push(&mut self, entry: LogEntry) {
        if self.lines.len() >= LOG_BUFFER_CAP {
            self.lines.pop_front();
        }
        self.lines.push_back(entry);
    }
}

/// Shared console stream: bounded ring of recent entries, broadcast
/// fan-out to subscribers, and a per-instance append-only log file. Two
/// producers write here: the subprocess readers and the supervisor's own
/// system messages.
pub struct ConsoleSink {
    buffer: Mutex<LogBuffer>,
    log_tx: broadcast::Sender<LogEntry>,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        let (log_tx, _) = broadcast::channel(256);
        Self {
            buffer: Mutex::new(LogBuffer {
                lines: VecDeque::with_capacity(LOG_BUFFER_CAP),
            }),
            log_tx,
            file: tokio::sync::Mutex::new(None),
        }
    }

    /// Redirects the append file to the given instance log; entries
    /// pushed before any attach stay memory-only.
    pub async fn attach_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;
        *self.file.lock().await = Some(file);
        Ok(())
    }

    pub async fn push(&self, category: LogCategory, message: String) -> LogEntry {
        let entry = LogEntry {
            time: Utc::now(),
            message,
            category,
        };
        self.buffer
            .lock()
            .expect("console buffer lock poisoned")
            .push(entry.clone());
        let _ = self.log_tx.send(entry.clone());

        let mut file = self.file.lock().await;
        if let Some(file) = file.as_mut() {
            let line = format!(
                "[{}] [{}] {}\n",
                entry.time.to_rfc3339(),
                entry.category.as_level(),
                entry.message
            );
            if let Err(e) = file.write_all(line.as_bytes()).await {
                warn!("failed to append console log: {}", e);
            }
        }
        entry
    }

    /// Categorized push for raw subprocess output.
    pub async fn push_line(&self, line: String) -> LogEntry {
        let category = categorize(&line);
        self.push(category, line).await
    }

    pub fn recent(&self) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .expect("console buffer lock poisoned")
            .lines
            .iter()
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.log_tx.subscribe()
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}
