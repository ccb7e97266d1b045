use std::fs;
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_FILE: &str = "instance.json";
pub const PROPERTIES_FILE: &str = "server.properties";
pub const SESSION_LOCK: &str = "session.lock";

/// On-disk layout under one daemon root:
///
/// ```text
/// <root>/instances/<id>/       instance working tree
/// <root>/backups/<id>/<name>/  snapshots
/// <root>/logs/<id>.log         per-instance append log
/// <root>/status.json           public status snapshot
/// ```
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn init_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.instances_root())?;
        fs::create_dir_all(self.backups_root())?;
        fs::create_dir_all(self.logs_root())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn instances_root(&self) -> PathBuf {
        self.root.join("instances")
    }

    pub fn backups_root(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn logs_root(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn instance_dir(&self, id: &str) -> PathBuf {
        self.instances_root().join(id)
    }

    pub fn descriptor_path(&self, id: &str) -> PathBuf {
        self.instance_dir(id).join(DESCRIPTOR_FILE)
    }

    pub fn properties_path(&self, id: &str) -> PathBuf {
        self.instance_dir(id).join(PROPERTIES_FILE)
    }

    pub fn console_log_path(&self, id: &str) -> PathBuf {
        self.logs_root().join(format!("{}.log", id))
    }

    pub fn status_snapshot_path(&self) -> PathBuf {
        self.root.join("status.json")
    }
}
