use std::path::Path;
use std::process::ExitStatus;
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::select;
use tokio::sync::{mpsc, Notify};

use craftd_protocol::management::instance::LogCategory;

use super::console::ConsoleSink;
use super::process_helper::ProcessHelper;
use crate::utils::strip_ansi;

lazy_static! {
    static ref DONE_PATTERN: Regex =
        Regex::new(r#"Done \(\d+\.\d{1,3}s\)! For help, type ["']help["']"#)
            .expect("Failed to compile DONE_PATTERN regex");
}

/// Launch argument vector, already composed for `Command`.
pub struct ProcessStartInfo {
    pub target: String,
    pub args: Vec<String>,
}

/// Signals surfaced to the lifecycle state machine.
#[derive(Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Readiness substring observed in the output stream.
    Ready,
    Exited { code: Option<i32>, benign: bool },
}

/// Exit codes 0 and the conventional signal-termination codes (130 =
/// SIGINT, 143 = SIGTERM) are intentional; on unix a raw SIGINT/SIGTERM
/// death counts the same.
pub fn is_benign_exit(status: &ExitStatus) -> bool {
    match status.code() {
        Some(code) => matches!(code, 0 | 130 | 143),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                matches!(status.signal(), Some(2) | Some(15))
            }
            #[cfg(not(unix))]
            {
                false
            }
        }
    }
}

/// One spawned server process: stdio wired into the console sink, exit
/// observed and classified, input stream kept for the command fallback
/// path. The handle is owned by the supervisor and replaced across
/// restarts, never aliased.
pub struct InstanceProcess {
    pid: u32,
    input_tx: mpsc::Sender<String>,
    kill_notify: Arc<Notify>,
    exited: Arc<AtomicBool>,
}

impl InstanceProcess {
    pub async fn spawn(
        start_info: ProcessStartInfo,
        working_dir: &Path,
        console: Arc<ConsoleSink>,
        event_tx: mpsc::Sender<ProcessEvent>,
    ) -> Result<Self, std::io::Error> {
        let mut cmd = Command::new(&start_info.target);
        cmd.args(&start_info.args)
            .current_dir(working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut process = cmd.spawn()?;
        let pid = process.id().unwrap_or(0);

        let kill_notify = Arc::new(Notify::new());
        let exited = Arc::new(AtomicBool::new(false));
        let (input_tx, mut input_rx) = mpsc::channel::<String>(64);

        let mut stdin = process.stdin.take();
        tokio::spawn(async move {
            while let Some(line) = input_rx.recv().await {
                let Some(handle) = stdin.as_mut() else { break };
                let data = if line.ends_with('\n') {
                    line
                } else {
                    format!("{}\n", line)
                };
                if handle.write_all(data.as_bytes()).await.is_err()
                    || handle.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let stdout = process.stdout.take().expect("stdout was piped");
        let stderr = process.stderr.take().expect("stderr was piped");
        tokio::spawn({
            let mut stdout = BufReader::new(stdout).lines();
            let mut stderr = BufReader::new(stderr).lines();
            let kill_notify = kill_notify.clone();
            let exited = exited.clone();
            let mut ready_sent = false;
            let mut stdout_done = false;
            let mut stderr_done = false;

            async move {
                loop {
                    select! {
                        line = stdout.next_line(), if !stdout_done => {
                            if let Ok(Some(line)) = line {
                                let line = strip_ansi(&line);
                                if !ready_sent && DONE_PATTERN.is_match(line.trim_end()) {
                                    ready_sent = true;
                                    let _ = event_tx.send(ProcessEvent::Ready).await;
                                }
                                console.push_line(line).await;
                            } else {
                                stdout_done = true;
                            }
                        }
                        line = stderr.next_line(), if !stderr_done => {
                            if let Ok(Some(line)) = line {
                                console.push(LogCategory::Error, strip_ansi(&line)).await;
                            } else {
                                stderr_done = true;
                            }
                        }
                        result = process.wait() => {
                            exited.store(true, atomic::Ordering::SeqCst);
                            let (code, benign) = match &result {
                                Ok(status) => (status.code(), is_benign_exit(status)),
                                Err(_) => (None, false),
                            };
                            let _ = event_tx.send(ProcessEvent::Exited { code, benign }).await;
                            break;
                        }
                        _ = kill_notify.notified() => {
                            if let Err(err) = process.kill().await {
                                warn!("Could not kill process (pid={}): {}", pid, err);
                            }
                            // wait arm reports the exit on the next pass
                        }
                    }
                }
            }
        });

        Ok(InstanceProcess {
            pid,
            input_tx,
            kill_notify,
            exited,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn exited(&self) -> bool {
        self.exited.load(atomic::Ordering::SeqCst)
    }

    /// Graceful termination asks the OS to signal the process; forceful
    /// goes through the reader task's kill path.
    pub fn terminate(&self, forceful: bool) {
        if forceful {
            self.kill_notify.notify_one();
        } else if let Err(e) = ProcessHelper::stop(self.pid) {
            warn!("Could not signal process (pid={}): {}", self.pid, e);
        }
    }

    /// Writes one line to the child's stdin (command fallback path).
    pub async fn write_line(&self, line: &str) -> anyhow::Result<()> {
        self.input_tx
            .send(line.to_string())
            .await
            .map_err(|_| anyhow::anyhow!("process input stream closed"))
    }
}
