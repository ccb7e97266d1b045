use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use craftd_protocol::management::player::{PlayerRecord, PlayerSource};

pub const USERCACHE_FILE: &str = "usercache.json";
pub const OPS_FILE: &str = "ops.json";
pub const BANNED_FILE: &str = "banned-players.json";
pub const WHITELIST_FILE: &str = "whitelist.json";

#[derive(Debug, Deserialize)]
struct CacheEntry {
    uuid: Uuid,
    name: String,
    #[serde(rename = "expiresOn", default)]
    expires_on: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RosterEntry {
    uuid: Uuid,
    name: String,
}

/// Missing or malformed source files read as empty; a single bad source
/// never fails the aggregation.
async fn read_source<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(_) => return vec![],
    };
    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("skipping malformed roster source {}: {}", path.display(), e);
            vec![]
        }
    }
}

fn parse_seen_stamp(raw: &Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw.as_deref()?;
    DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Merges the four static identity lists in `dir` with an optional live
/// name list into one deduplicated, flag-annotated view. Records are
/// rebuilt fresh on every call; output is ordered online-first, then
/// descending last-seen, then name.
pub async fn aggregate(dir: &Path, live_names: Option<&[String]>) -> Vec<PlayerRecord> {
    let mut players: HashMap<String, PlayerRecord> = HashMap::new();

    for entry in read_source::<CacheEntry>(&dir.join(USERCACHE_FILE)).await {
        let id = entry.uuid.to_string();
        let record = players
            .entry(id.clone())
            .or_insert_with(|| PlayerRecord::new(id, entry.name, PlayerSource::Cache));
        record.last_seen = parse_seen_stamp(&entry.expires_on);
    }

    for (file, source) in [
        (OPS_FILE, PlayerSource::Ops),
        (BANNED_FILE, PlayerSource::Banned),
        (WHITELIST_FILE, PlayerSource::Whitelist),
    ] {
        for entry in read_source::<RosterEntry>(&dir.join(file)).await {
            let id = entry.uuid.to_string();
            let record = players
                .entry(id.clone())
                .or_insert_with(|| PlayerRecord::new(id, entry.name, source));
            match source {
                PlayerSource::Ops => record.op = true,
                PlayerSource::Banned => record.banned = true,
                PlayerSource::Whitelist => record.whitelisted = true,
                _ => unreachable!(),
            }
        }
    }

    if let Some(live_names) = live_names {
        let now = Utc::now();
        for name in live_names {
            let matched = players
                .iter()
                .find(|(_, r)| r.name.eq_ignore_ascii_case(name))
                .map(|(id, _)| id.clone());
            if let Some(record) = matched.and_then(|id| players.get_mut(&id)) {
                record.online = true;
                record.last_seen = Some(now);
            } else {
                // connected player with no static record yet
                let id = format!("live:{}", name);
                let mut record = PlayerRecord::new(id.clone(), name.clone(), PlayerSource::Live);
                record.online = true;
                record.last_seen = Some(now);
                players.insert(id, record);
            }
        }
    }

    let mut records: Vec<PlayerRecord> = players.into_values().collect();
    records.sort_by(|a, b| {
        b.online
            .cmp(&a.online)
            .then(b.last_seen.cmp(&a.last_seen))
            .then(a.name.cmp(&b.name))
    });
    records
}
