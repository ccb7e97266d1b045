use std::path::PathBuf;

use craftd_protocol::management::instance::InstanceState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("operation `{op}` not allowed while {state:?}")]
    InvalidLifecycle {
        op: &'static str,
        state: InstanceState,
    },

    #[error("instance `{0}` not found")]
    InstanceNotFound(String),

    #[error("an instance already exists: `{0}`")]
    InstanceExists(String),

    #[error("instance config not found at {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("failed to spawn server process")]
    Spawn(#[source] std::io::Error),

    #[error("control channel unavailable")]
    ControlChannelUnavailable,

    #[error("crash limit exceeded after {0} unintended exits")]
    CrashLimitExceeded(u32),

    #[error("backup `{0}` not found")]
    BackupNotFound(String),

    #[error("atomic write to {} failed", path.display())]
    AtomicWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SupervisorError {
    /// Transient kinds may be swallowed at the call site (degraded
    /// operation); everything else must propagate.
    pub fn is_transient(&self) -> bool {
        matches!(self, SupervisorError::ControlChannelUnavailable)
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_control_channel_loss_is_transient() {
        assert!(SupervisorError::ControlChannelUnavailable.is_transient());
        assert!(!SupervisorError::CrashLimitExceeded(4).is_transient());
        assert!(!SupervisorError::InvalidLifecycle {
            op: "start",
            state: InstanceState::Online,
        }
        .is_transient());
    }
}
