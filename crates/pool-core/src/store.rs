//! The concurrent pool store (spec.md §4.4): a map keyed by canonical
//! proxy URL, a sorted key index for deterministic round-robin
//! traversal, and the round-robin cursor, all under one
//! `parking_lot::RwLock` (see SPEC_FULL.md §5 for why a sync lock is
//! correct here: nothing awaits while the lock is held).

use crate::model::ProxyInfo;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

struct Inner {
    records: HashMap<String, ProxyInfo>,
    /// Sorted snapshot of `records.keys()`, rebuilt on insert (spec.md
    /// §9: "an ordered secondary index ... recommended").
    ordered_keys: Vec<String>,
    last_picked: Option<String>,
}

impl Inner {
    fn rebuild_index(&mut self) {
        self.ordered_keys = self.records.keys().cloned().collect();
        self.ordered_keys.sort();
    }
}

pub struct PoolStore {
    inner: RwLock<Inner>,
    path: PathBuf,
}

impl PoolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                ordered_keys: Vec::new(),
                last_picked: None,
            }),
            path: path.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn alive_count(&self) -> usize {
        self.inner.read().records.values().filter(|r| r.alive).count()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.inner.read().records.contains_key(url)
    }

    /// Invariant 2 (dedup): re-inserting an already-alive record does
    /// not reset `lastChecked`.
    pub fn insert(&self, record: ProxyInfo) {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.records.get(&record.url) {
            if existing.alive {
                return;
            }
        }
        let is_new = !inner.records.contains_key(&record.url);
        inner.records.insert(record.url.clone(), record);
        if is_new {
            inner.rebuild_index();
        }
    }

    /// Overwrite the probe-derived fields of an existing record in
    /// place, per spec.md §4.4: "writes ... serialized" and §4.6:
    /// "the dispatcher does not mutate alive" — only this path does.
    pub fn update_probe_result(
        &self,
        url: &str,
        alive: bool,
        latency: std::time::Duration,
        exit_ip: Option<String>,
    ) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.get_mut(url) {
            record.alive = alive;
            record.latency = latency;
            record.last_checked = chrono::Utc::now();
            if let Some(ip) = exit_ip {
                record.exit_ip = ip;
            }
        }
    }

    pub fn get(&self, url: &str) -> Option<ProxyInfo> {
        self.inner.read().records.get(url).cloned()
    }

    /// Snapshot of all records, e.g. for the recheck loop's scan.
    pub fn snapshot(&self) -> Vec<ProxyInfo> {
        self.inner.read().records.values().cloned().collect()
    }

    /// Round-robin pick: advance past `last_picked` over the ordered
    /// key list and return the first alive entry found, wrapping once.
    pub fn pick_next_alive(&self) -> Option<ProxyInfo> {
        let mut inner = self.inner.write();
        if inner.ordered_keys.is_empty() {
            return None;
        }

        let start = match &inner.last_picked {
            Some(key) => inner
                .ordered_keys
                .iter()
                .position(|k| k == key)
                .map(|i| (i + 1) % inner.ordered_keys.len())
                .unwrap_or(0),
            None => 0,
        };

        let n = inner.ordered_keys.len();
        for offset in 0..n {
            let idx = (start + offset) % n;
            let key = &inner.ordered_keys[idx];
            if let Some(record) = inner.records.get(key) {
                if record.alive {
                    let key = key.clone();
                    let result = record.clone();
                    inner.last_picked = Some(key);
                    return Some(result);
                }
            }
        }
        None
    }

    /// Atomic persistence: write a `.tmp` sibling, then rename over the
    /// target (spec.md §4.4 / §9).
    pub async fn save(&self) -> crate::error::Result<()> {
        let map: HashMap<String, ProxyInfo> = self.inner.read().records.clone();
        let json = serde_json::to_string_pretty(&map).map_err(|e| crate::error::PoolError::ConfigIo(
            std::io::Error::new(ErrorKind::InvalidData, e),
        ))?;

        let tmp_path = tmp_sibling(&self.path);
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        debug!(path = %self.path.display(), count = map.len(), "pool store snapshot saved");
        Ok(())
    }

    /// Load from disk, repairing single-shot syntactic truncation and
    /// materializing an empty map if the file is absent (spec.md §4.4).
    /// Every loaded entry starts `alive = false` pending re-probe: a
    /// loaded record is never trusted without revalidation.
    pub async fn load(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, "{}").await?;
                String::from("{}")
            }
            Err(e) => return Err(e.into()),
        };

        let records = parse_with_single_repair(&contents)?;

        let store = Self::new(path);
        {
            let mut inner = store.inner.write();
            for (url, mut record) in records {
                record.alive = false;
                inner.records.insert(url, record);
            }
            inner.rebuild_index();
        }
        Ok(store)
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "aliveDataPath.json".into());
    name.push(".tmp");
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => PathBuf::from(name),
    }
}

fn parse_with_single_repair(contents: &str) -> crate::error::Result<HashMap<String, ProxyInfo>> {
    match serde_json::from_str(contents) {
        Ok(map) => Ok(map),
        Err(first_err) => {
            let repaired = repair_truncated(contents);
            match serde_json::from_str(&repaired) {
                Ok(map) => {
                    warn!("alive-data file required syntactic repair on load");
                    Ok(map)
                }
                Err(_) => Err(crate::error::PoolError::ConfigIo(std::io::Error::new(
                    ErrorKind::InvalidData,
                    first_err,
                ))),
            }
        }
    }
}

/// Append the missing closing bracket/brace for a truncated top-level
/// container, once (spec.md §9's single-shot repair).
fn repair_truncated(contents: &str) -> String {
    let trimmed = contents.trim_end();
    if let Some(first) = trimmed.trim_start().chars().next() {
        match first {
            '{' if !trimmed.ends_with('}') => return format!("{trimmed}}}"),
            '[' if !trimmed.ends_with(']') => return format!("{trimmed}]"),
            _ => {}
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_proxy_url, ProxyInfo};
    use std::time::Duration;

    fn make_alive(url: &str) -> ProxyInfo {
        let (canonical, identity) = parse_proxy_url(url).unwrap();
        let mut info = ProxyInfo::new(canonical, identity, "file");
        info.alive = true;
        info
    }

    #[test]
    fn insert_is_idempotent_and_does_not_reset_alive_record() {
        let store = PoolStore::new("unused.json");
        let mut a = make_alive("1.1.1.1:1080");
        a.latency = Duration::from_millis(50);
        store.insert(a.clone());

        let mut a2 = a.clone();
        a2.latency = Duration::from_millis(999);
        store.insert(a2);

        let got = store.get(&a.url).unwrap();
        assert_eq!(got.latency, Duration::from_millis(50));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn round_robin_cycles_in_key_order() {
        let store = PoolStore::new("unused.json");
        store.insert(make_alive("1.1.1.1:1080"));
        store.insert(make_alive("2.2.2.2:1080"));
        store.insert(make_alive("3.3.3.3:1080"));

        let mut order = Vec::new();
        for _ in 0..6 {
            let picked = store.pick_next_alive().unwrap();
            order.push(picked.host);
        }
        assert_eq!(
            order,
            vec!["1.1.1.1", "2.2.2.2", "3.3.3.3", "1.1.1.1", "2.2.2.2", "3.3.3.3"]
        );
    }

    #[test]
    fn pick_skips_non_alive_entries() {
        let store = PoolStore::new("unused.json");
        let mut dead = make_alive("1.1.1.1:1080");
        dead.alive = false;
        store.insert(dead);
        store.insert(make_alive("2.2.2.2:1080"));

        let picked = store.pick_next_alive().unwrap();
        assert_eq!(picked.host, "2.2.2.2");
    }

    #[test]
    fn repair_truncated_object_closes_brace() {
        let truncated = r#"{"a": {"url": "socks5://1.1.1.1:1080""#;
        let repaired = repair_truncated(truncated);
        assert!(repaired.ends_with('}'));
    }

    #[tokio::test]
    async fn save_then_load_round_trips_key_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alive.json");

        let store = PoolStore::new(&path);
        store.insert(make_alive("1.1.1.1:1080"));
        store.insert(make_alive("2.2.2.2:1080"));
        store.save().await.unwrap();

        let reloaded = PoolStore::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        // Invariant: loaded entries are not trusted; alive resets to false.
        assert_eq!(reloaded.alive_count(), 0);
    }

    #[tokio::test]
    async fn load_missing_file_materializes_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("alive.json");

        let store = PoolStore::load(&path).await.unwrap();
        assert_eq!(store.len(), 0);
        assert!(tokio::fs::metadata(&path).await.is_ok());
    }

    #[tokio::test]
    async fn tmp_sibling_ignored_by_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alive.json");
        tokio::fs::write(&path, r#"{"a": {"not": "valid record shape"}}"#)
            .await
            .ok();
        // Leave a stray .tmp with different content; load must ignore it.
        tokio::fs::write(tmp_sibling(&path), "{\"stray\": {}}").await.unwrap();

        // The real file has an invalid record shape, so load should error
        // rather than silently picking up the .tmp sibling.
        assert!(PoolStore::load(&path).await.is_err());
    }
}
