//! Append-only transfer history.
//!
//! One line per transferred recording: the identity key, a space, then a
//! free-text descriptor. The store is the at-most-once guard for the whole
//! pipeline — an identity present here is never transferred again. Loading
//! merges an optional externally-authored secondary file first, then the
//! primary file, so the primary's descriptor wins for a shared identity.
//!
//! Appends are the only mutation. The in-memory set is updated before the
//! append returns, so later items in the same run see the new entry even if
//! the write itself failed (which is logged and otherwise ignored — a
//! crashed in-flight append costs at worst one duplicate download on the
//! next run, never the loss of completed entries).

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Error;

#[derive(Debug)]
pub struct HistoryStore {
    primary: PathBuf,
    entries: HashMap<String, String>,
}

impl HistoryStore {
    /// Load the store from the secondary (if configured) then primary file.
    /// Missing files are treated as empty, not as errors.
    pub fn load(primary: &Path, secondary: Option<&Path>) -> Self {
        let mut entries = HashMap::new();
        if let Some(extra) = secondary {
            load_file(extra, &mut entries);
        }
        load_file(primary, &mut entries);
        Self {
            primary: primary.to_path_buf(),
            entries,
        }
    }

    /// An empty store that still appends to `primary` (`--ignore-history`).
    pub fn empty(primary: &Path) -> Self {
        Self {
            primary: primary.to_path_buf(),
            entries: HashMap::new(),
        }
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a completed transfer. The membership set is updated first so
    /// the rest of the run deduplicates against it regardless of whether
    /// the file write succeeds.
    pub fn append(&mut self, identity: &str, descriptor: &str) -> Result<(), Error> {
        let line = format!("{} {}", identity, descriptor);
        self.entries.insert(identity.to_string(), line.clone());

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.primary)
            .and_then(|mut file| writeln!(file, "{}", line));

        result.map_err(|source| Error::Persistence {
            op: "append to",
            path: self.primary.clone(),
            source,
        })
    }
}

fn load_file(path: &Path, entries: &mut HashMap<String, String>) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unreadable history file, treating as empty");
            return;
        }
    };
    for line in content.lines() {
        let line = line.trim();
        if let Some(identity) = line.split_whitespace().next() {
            entries.insert(identity.to_string(), line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(&dir.path().join("none"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_append_then_contains_same_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tablo.history");
        let mut store = HistoryStore::load(&path, None);
        assert!(!store.contains("EP0001"));
        store.append("EP0001", "Show - Pilot").unwrap();
        assert!(store.contains("EP0001"));
    }

    #[test]
    fn test_round_trip_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tablo.history");
        {
            let mut store = HistoryStore::load(&path, None);
            store.append("EP0001", "Show - Pilot").unwrap();
            store.append("MV0002", "Some Movie (2015)").unwrap();
        }
        let reloaded = HistoryStore::load(&path, None);
        assert!(reloaded.contains("EP0001"));
        assert!(reloaded.contains("MV0002"));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_primary_overrides_secondary() {
        let dir = tempfile::tempdir().unwrap();
        let secondary = dir.path().join("auto.history");
        let primary = dir.path().join("tablo.history");
        std::fs::write(&secondary, "EP0001 from secondary\nEP0002 only here\n").unwrap();
        std::fs::write(&primary, "EP0001 from primary\n").unwrap();

        let store = HistoryStore::load(&primary, Some(&secondary));
        assert!(store.contains("EP0001"));
        assert!(store.contains("EP0002"));
        assert_eq!(store.entries["EP0001"], "EP0001 from primary");
    }

    #[test]
    fn test_blank_lines_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tablo.history");
        std::fs::write(&path, "\n\nEP0001 desc\n   \n").unwrap();
        let store = HistoryStore::load(&path, None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_membership_updates_even_on_write_failure() {
        let mut store = HistoryStore::empty(Path::new("/nonexistent-dir/tablo.history"));
        let result = store.append("EP0001", "desc");
        assert!(result.is_err());
        assert!(store.contains("EP0001"));
    }
}
