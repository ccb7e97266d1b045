use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{de::DeserializeOwned, Serialize};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Sibling temp path unique within the process, so overlapping writers
/// never share a staging file.
fn temp_sibling(path: &Path) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(&format!(".{}.tmp", seq));
    path.with_file_name(name)
}

/// Write-to-temp-then-rename. The rename is the commit point: a reader
/// sees either the old content or the new, never a partial file.
pub fn write_atomic_sync<P: AsRef<Path>>(path: P, content: &str) -> std::io::Result<()> {
    let path = path.as_ref();
    let tmp = temp_sibling(path);
    std::fs::write(&tmp, content)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

pub async fn write_atomic<P: AsRef<Path>>(path: P, content: &str) -> std::io::Result<()> {
    let path = path.as_ref();
    let tmp = temp_sibling(path);
    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

pub trait AtomicFileIo {
    fn write_replacing<P: AsRef<Path>>(path: P, content: &str) -> std::io::Result<()> {
        write_atomic_sync(path, content)
    }
}

/// Trait for configuration handling.
pub trait Config: AtomicFileIo {
    type ConfigType: Serialize + DeserializeOwned;

    fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Self::ConfigType> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self::ConfigType = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn save_config<P: AsRef<Path>>(path: P, config: &Self::ConfigType) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        Self::write_replacing(path, &content)?;
        Ok(())
    }

    fn load_config_or_default<P: AsRef<Path>, F: FnOnce() -> Self::ConfigType>(
        path: P,
        default: F,
    ) -> anyhow::Result<Self::ConfigType> {
        match std::fs::metadata(path.as_ref()) {
            Ok(metadata) if metadata.is_file() => Self::load_config(path),
            _ => {
                let config = default();
                Self::save_config(path, &config)?;
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.json");
        write_atomic_sync(&path, "{\"a\":1}").unwrap();
        write_atomic_sync(&path, "{\"a\":2}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":2}");
        // no staging files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn overlapping_saves_never_expose_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        write_atomic(&path, "{\"seq\": 0}").await.unwrap();

        let mut writers = Vec::new();
        for i in 1..=8u32 {
            let path = path.clone();
            writers.push(tokio::spawn(async move {
                let body = format!("{{\"seq\": {}, \"pad\": \"{}\"}}", i, "x".repeat(4096));
                write_atomic(&path, &body).await.unwrap();
            }));
        }
        let reader = {
            let path = path.clone();
            tokio::spawn(async move {
                for _ in 0..32 {
                    let content = tokio::fs::read_to_string(&path).await.unwrap();
                    serde_json::from_str::<serde_json::Value>(&content).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        for w in writers {
            w.await.unwrap();
        }
        reader.await.unwrap();
    }
}
