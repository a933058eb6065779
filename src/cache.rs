//! Persisted catalog cache of raw metadata documents.
//!
//! Metadata fetches dominate a poll cycle on a full device, and finished
//! recordings never change, so their raw documents are cached across runs.
//! The snapshot is a versioned JSON document keyed by device address and
//! recording id. Persistence is whole-file rewrite: load everything, mutate
//! in memory, serialize everything back. A corrupt or unreadable snapshot
//! (including a version mismatch) loads as empty rather than failing — the
//! cost is a re-fetch, never an aborted run.
//!
//! Freshness rule: only `finished` entries within the validity window are
//! served from cache. Anything still recording (or failed, or unknown) is
//! re-fetched every cycle, since in-progress recordings must never be
//! treated as stable.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Error;

const CACHE_VERSION: u32 = 1;

/// One cached metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// When the document was fetched, UTC epoch seconds.
    pub fetched_at: i64,
    /// Recording status at fetch time; only `finished` entries are stable.
    pub status: String,
    /// The raw document exactly as the device returned it.
    pub doc: Value,
}

impl CacheEntry {
    /// Whether this entry may be served without a re-fetch.
    pub fn is_fresh(&self, now: i64, validity_secs: i64) -> bool {
        self.status == "finished" && now - self.fetched_at < validity_secs
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: HashMap<String, HashMap<String, CacheEntry>>,
}

/// In-memory cache, keyed by (device address, recording id).
#[derive(Debug)]
pub struct CatalogCache {
    path: Option<PathBuf>,
    entries: HashMap<String, HashMap<String, CacheEntry>>,
    dirty: bool,
}

impl CatalogCache {
    /// Load the snapshot at `path`; `None` disables caching (every lookup
    /// misses and `save` is a no-op).
    pub fn load(path: Option<&Path>) -> Self {
        let entries = match path {
            Some(p) => read_snapshot(p),
            None => HashMap::new(),
        };
        Self {
            path: path.map(Path::to_path_buf),
            entries,
            dirty: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.path.is_some()
    }

    /// The cached document for (device, id) when fresh, else `None`.
    pub fn fresh_doc(&self, device: &str, id: u64, now: i64, validity_secs: i64) -> Option<&Value> {
        self.entries
            .get(device)?
            .get(&id.to_string())
            .filter(|entry| entry.is_fresh(now, validity_secs))
            .map(|entry| &entry.doc)
    }

    /// Store a freshly fetched document.
    pub fn insert(&mut self, device: &str, id: u64, status: &str, doc: Value, now: i64) {
        if self.path.is_none() {
            return;
        }
        self.entries.entry(device.to_string()).or_default().insert(
            id.to_string(),
            CacheEntry {
                fetched_at: now,
                status: status.to_string(),
                doc,
            },
        );
        self.dirty = true;
    }

    /// Drop entries for `device` whose id no longer appears in the device's
    /// current listing. Other devices' entries are untouched.
    pub fn prune_device(&mut self, device: &str, live_ids: &HashSet<u64>) {
        if let Some(per_device) = self.entries.get_mut(device) {
            let before = per_device.len();
            per_device.retain(|id, _| id.parse::<u64>().map(|n| live_ids.contains(&n)).unwrap_or(false));
            if per_device.len() != before {
                debug!(
                    device,
                    removed = before - per_device.len(),
                    "pruned stale cache entries"
                );
                self.dirty = true;
            }
        }
    }

    /// Rewrite the snapshot if anything changed. Write errors are reported
    /// but are not fatal to the run.
    pub fn save(&mut self) -> Result<(), Error> {
        let path = match &self.path {
            Some(p) if self.dirty => p.clone(),
            _ => return Ok(()),
        };
        let file = CacheFile {
            version: CACHE_VERSION,
            entries: self.entries.clone(),
        };
        let body = serde_json::to_string(&file).unwrap_or_default();
        std::fs::write(&path, body).map_err(|source| Error::Persistence {
            op: "write",
            path: path.clone(),
            source,
        })?;
        self.dirty = false;
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> HashMap<String, HashMap<String, CacheEntry>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unreadable cache snapshot, starting empty");
            return HashMap::new();
        }
    };
    match serde_json::from_str::<CacheFile>(&content) {
        Ok(file) if file.version == CACHE_VERSION => file.entries,
        Ok(file) => {
            warn!(
                path = %path.display(),
                version = file.version,
                "cache snapshot version mismatch, starting empty"
            );
            HashMap::new()
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "corrupt cache snapshot, starting empty");
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_freshness_window() {
        let entry = CacheEntry {
            fetched_at: 1000,
            status: "finished".into(),
            doc: json!({}),
        };
        let window = 600;
        assert!(entry.is_fresh(1000 + window - 1, window));
        assert!(!entry.is_fresh(1000 + window + 1, window));
    }

    #[test]
    fn test_non_finished_always_stale() {
        for status in ["recording", "failed", "unknown"] {
            let entry = CacheEntry {
                fetched_at: 1000,
                status: status.into(),
                doc: json!({}),
            };
            assert!(!entry.is_fresh(1001, 600), "{} should be stale", status);
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tablo.cache.json");
        {
            let mut cache = CatalogCache::load(Some(&path));
            cache.insert("10.0.0.5", 42, "finished", json!({"a": 1}), 1000);
            cache.save().unwrap();
        }
        let cache = CatalogCache::load(Some(&path));
        assert_eq!(
            cache.fresh_doc("10.0.0.5", 42, 1001, 600),
            Some(&json!({"a": 1}))
        );
    }

    #[test]
    fn test_corrupt_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tablo.cache.json");
        std::fs::write(&path, "{'this': is not json").unwrap();
        let cache = CatalogCache::load(Some(&path));
        assert!(cache.fresh_doc("10.0.0.5", 1, 0, 600).is_none());
    }

    #[test]
    fn test_version_mismatch_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tablo.cache.json");
        std::fs::write(&path, r#"{"version": 99, "entries": {}}"#).unwrap();
        let cache = CatalogCache::load(Some(&path));
        assert!(!cache.fresh_doc("10.0.0.5", 1, 0, 600).is_some());
    }

    #[test]
    fn test_prune_is_device_scoped() {
        let mut cache = CatalogCache::load(None);
        // Enable in-memory behavior by giving it a path-less insert override.
        cache.path = Some(PathBuf::from("unused"));
        cache.insert("dev-a", 1, "finished", json!({}), 0);
        cache.insert("dev-a", 2, "finished", json!({}), 0);
        cache.insert("dev-b", 1, "finished", json!({}), 0);

        let live: HashSet<u64> = [2].into_iter().collect();
        cache.prune_device("dev-a", &live);

        assert!(cache.fresh_doc("dev-a", 1, 0, 600).is_none());
        assert!(cache.fresh_doc("dev-a", 2, 0, 600).is_some());
        // Other device untouched even though id 1 is not in dev-a's listing.
        assert!(cache.fresh_doc("dev-b", 1, 0, 600).is_some());
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let mut cache = CatalogCache::load(None);
        cache.insert("dev", 1, "finished", json!({}), 0);
        assert!(cache.fresh_doc("dev", 1, 0, 600).is_none());
        cache.save().unwrap();
    }
}
