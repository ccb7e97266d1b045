use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;

use craftd_protocol::management::backup::{BackupEntry, RetentionPolicy};

use crate::management::error::SupervisorError;
use crate::storage::files::SESSION_LOCK;
use crate::utils::{sanitize_label, sanitize_timestamp};

/// Snapshot store under `<backupsRoot>/<instanceId>/<name>/`. Lifecycle
/// gating (OFFLINE only) is the supervisor's job; this type only moves
/// file trees.
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn instance_root(&self, instance_id: &str) -> PathBuf {
        self.root.join(instance_id)
    }

    /// Creation time is recovered from the directory-name timestamp
    /// suffix, falling back to filesystem mtime.
    fn entry_created(id: &str, path: &Path) -> DateTime<Utc> {
        let parsed = id
            .len()
            .checked_sub(19)
            .and_then(|at| id.get(at..))
            .and_then(|stamp| NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H-%M-%S").ok())
            .map(|naive| naive.and_utc());
        parsed.unwrap_or_else(|| {
            std::fs::metadata(path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now())
        })
    }

    pub async fn list(&self, instance_id: &str) -> anyhow::Result<Vec<BackupEntry>> {
        let root = self.instance_root(instance_id);
        if !root.is_dir() {
            return Ok(vec![]);
        }
        let entries = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<BackupEntry>> {
            let mut entries = vec![];
            for dir_entry in std::fs::read_dir(&root)? {
                let dir_entry = dir_entry?;
                if !dir_entry.file_type()?.is_dir() {
                    continue;
                }
                let path = dir_entry.path();
                let id = dir_entry.file_name().to_string_lossy().into_owned();
                entries.push(BackupEntry {
                    created: Self::entry_created(&id, &path),
                    size: tree_size(&path)?,
                    id,
                    path,
                });
            }
            entries.sort_by(|a, b| b.created.cmp(&a.created));
            Ok(entries)
        })
        .await
        .context("backup listing task failed")??;
        Ok(entries)
    }

    /// Copies the whole instance tree into a new snapshot directory,
    /// excluding the session-lock marker. A copy failure is surfaced
    /// as-is and never retried.
    pub async fn create(
        &self,
        instance_id: &str,
        source_dir: &Path,
        label: Option<&str>,
    ) -> anyhow::Result<BackupEntry> {
        let id = format!(
            "{}-{}",
            sanitize_label(label.unwrap_or("backup")),
            sanitize_timestamp(Utc::now())
        );
        let target = self.instance_root(instance_id).join(&id);
        let source = source_dir.to_path_buf();

        let (id, path) = tokio::task::spawn_blocking(move || -> anyhow::Result<(String, PathBuf)> {
            if target.exists() {
                anyhow::bail!("backup `{}` already exists", id);
            }
            std::fs::create_dir_all(&target)?;
            copy_tree(&source, &target)?;
            Ok((id, target))
        })
        .await
        .context("backup copy task failed")??;

        Ok(BackupEntry {
            created: Self::entry_created(&id, &path),
            size: tokio::task::spawn_blocking({
                let path = path.clone();
                move || tree_size(&path)
            })
            .await
            .context("backup sizing task failed")??,
            id,
            path,
        })
    }

    /// Wipes every entry in the instance directory, then copies the
    /// snapshot tree in. A partial failure leaves the instance directory
    /// in an undefined (possibly empty) state; there is no rollback.
    pub async fn restore(
        &self,
        instance_id: &str,
        backup_id: &str,
        target_dir: &Path,
    ) -> Result<(), SupervisorError> {
        let source = self.instance_root(instance_id).join(backup_id);
        if !source.is_dir() {
            return Err(SupervisorError::BackupNotFound(backup_id.to_string()));
        }
        let target = target_dir.to_path_buf();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            for entry in std::fs::read_dir(&target)? {
                let path = entry?.path();
                if path.is_dir() {
                    std::fs::remove_dir_all(&path)?;
                } else {
                    std::fs::remove_file(&path)?;
                }
            }
            copy_tree(&source, &target)
        })
        .await
        .map_err(|e| SupervisorError::Other(anyhow::anyhow!("restore task failed: {}", e)))?
        .map_err(SupervisorError::Other)?;
        Ok(())
    }

    /// Best-effort removal: existence is checked, removal errors are
    /// logged and swallowed.
    pub async fn delete(&self, instance_id: &str, backup_id: &str) -> Result<(), SupervisorError> {
        let path = self.instance_root(instance_id).join(backup_id);
        if !path.is_dir() {
            return Err(SupervisorError::BackupNotFound(backup_id.to_string()));
        }
        if let Err(e) = tokio::fs::remove_dir_all(&path).await {
            warn!("failed to remove backup {}: {}", path.display(), e);
        }
        Ok(())
    }

    /// Applies the deletion-time retention policy to all snapshots of an
    /// instance.
    pub async fn apply_retention(
        &self,
        instance_id: &str,
        policy: RetentionPolicy,
    ) -> anyhow::Result<()> {
        if policy == RetentionPolicy::KeepAll {
            return Ok(());
        }
        let entries = self.list(instance_id).await?;
        let skip = match policy {
            RetentionPolicy::KeepLatest => 1,
            _ => 0,
        };
        // list() is sorted newest-first
        for entry in entries.into_iter().skip(skip) {
            if let Err(e) = tokio::fs::remove_dir_all(&entry.path).await {
                warn!("failed to remove backup {}: {}", entry.path.display(), e);
            }
        }
        Ok(())
    }
}

fn copy_tree(source: &Path, target: &Path) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy() == SESSION_LOCK {
            continue;
        }
        let from = entry.path();
        let to = target.join(&name);
        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&to)?;
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)
                .with_context(|| format!("failed to copy {}", from.display()))?;
        }
    }
    Ok(())
}

fn tree_size(path: &Path) -> anyhow::Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            total += tree_size(&entry.path())?;
        } else {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_instance(dir: &Path) {
        tokio::fs::write(dir.join("server.jar"), b"jar bytes").await.unwrap();
        tokio::fs::write(dir.join(SESSION_LOCK), b"lock").await.unwrap();
        tokio::fs::create_dir_all(dir.join("world/region")).await.unwrap();
        tokio::fs::write(dir.join("world/region/r.0.0.mca"), b"chunk data")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_excludes_session_lock() {
        let root = tempfile::tempdir().unwrap();
        let instance = tempfile::tempdir().unwrap();
        seed_instance(instance.path()).await;

        let manager = BackupManager::new(root.path());
        let entry = manager
            .create("survival", instance.path(), Some("pre wipe"))
            .await
            .unwrap();

        assert!(entry.id.starts_with("pre-wipe-"));
        assert!(entry.path.join("server.jar").is_file());
        assert!(entry.path.join("world/region/r.0.0.mca").is_file());
        assert!(!entry.path.join(SESSION_LOCK).exists());
        assert_eq!(entry.size, ("jar bytes".len() + "chunk data".len()) as u64);
    }

    #[tokio::test]
    async fn restore_replaces_working_tree() {
        let root = tempfile::tempdir().unwrap();
        let instance = tempfile::tempdir().unwrap();
        seed_instance(instance.path()).await;

        let manager = BackupManager::new(root.path());
        let entry = manager.create("survival", instance.path(), None).await.unwrap();

        tokio::fs::write(instance.path().join("corrupted"), b"junk").await.unwrap();
        tokio::fs::remove_file(instance.path().join("server.jar")).await.unwrap();

        manager
            .restore("survival", &entry.id, instance.path())
            .await
            .unwrap();
        assert!(instance.path().join("server.jar").is_file());
        assert!(!instance.path().join("corrupted").exists());
    }

    #[tokio::test]
    async fn restore_unknown_backup_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let instance = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(root.path());
        assert!(matches!(
            manager.restore("survival", "missing", instance.path()).await,
            Err(SupervisorError::BackupNotFound(_))
        ));
    }

    async fn seed_backups(manager: &BackupManager) {
        let base = manager.instance_root("survival");
        for name in [
            "backup-2024-05-01T10-00-00",
            "backup-2024-05-02T10-00-00",
            "nightly-2024-05-03T10-00-00",
        ] {
            std::fs::create_dir_all(base.join(name)).unwrap();
        }
    }

    #[tokio::test]
    async fn list_sorts_newest_first() {
        let root = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(root.path());
        seed_backups(&manager).await;

        let entries = manager.list("survival").await.unwrap();
        assert_eq!(
            entries.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec![
                "nightly-2024-05-03T10-00-00",
                "backup-2024-05-02T10-00-00",
                "backup-2024-05-01T10-00-00",
            ]
        );
    }

    #[tokio::test]
    async fn retention_keep_latest_keeps_exactly_one() {
        let root = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(root.path());
        seed_backups(&manager).await;

        manager
            .apply_retention("survival", RetentionPolicy::KeepLatest)
            .await
            .unwrap();
        let remaining = manager.list("survival").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "nightly-2024-05-03T10-00-00");
    }

    #[tokio::test]
    async fn retention_delete_all_and_keep_all() {
        let root = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(root.path());
        seed_backups(&manager).await;

        manager
            .apply_retention("survival", RetentionPolicy::KeepAll)
            .await
            .unwrap();
        assert_eq!(manager.list("survival").await.unwrap().len(), 3);

        manager
            .apply_retention("survival", RetentionPolicy::DeleteAll)
            .await
            .unwrap();
        assert!(manager.list("survival").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_backup_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(root.path());
        assert!(matches!(
            manager.delete("survival", "missing").await,
            Err(SupervisorError::BackupNotFound(_))
        ));
    }
}
