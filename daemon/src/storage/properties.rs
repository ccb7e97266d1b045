use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;

use super::file::write_atomic;

/// Line-oriented `key=value` server properties. Reading is permissive:
/// blank lines, `#` comments, and lines without `=` are skipped. Saving
/// rewrites the whole file with a regenerated header; original ordering
/// and comments are not preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerProperties {
    entries: BTreeMap<String, String>,
}

impl ServerProperties {
    pub fn parse(content: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                entries.insert(key.to_string(), value.trim().to_string());
            }
        }
        Self { entries }
    }

    /// Missing file reads as an empty map.
    pub async fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        write_atomic(path, &self.render()).await
    }

    fn render(&self) -> String {
        let mut out = String::from("#Minecraft server properties\n");
        out.push_str(&format!("#{}\n", Utc::now().to_rfc2822()));
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn merge(&mut self, patch: &BTreeMap<String, String>) {
        for (key, value) in patch {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}
