//! File provider seam: resolves playlist entry ids to playable local handles.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{debug, warn};

use crate::protocol::{EntryId, LocalHandle};

/// Resolves entry ids on demand and releases them to bound memory.
pub trait FileProvider: Send + Sync {
    /// Returns handles for the ids that could be resolved. Unresolvable ids
    /// are omitted.
    fn resolve(&self, ids: &[EntryId]) -> Vec<LocalHandle>;
    fn release(&self, ids: &[EntryId]);
}

/// Maps entry ids to files on disk.
pub struct PathFileProvider {
    locations: Mutex<HashMap<EntryId, PathBuf>>,
    resident: Mutex<HashSet<EntryId>>,
    next_generation: AtomicU64,
}

impl PathFileProvider {
    pub fn new() -> Self {
        Self {
            locations: Mutex::new(HashMap::new()),
            resident: Mutex::new(HashSet::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn insert(&self, entry_id: EntryId, location: PathBuf) {
        match self.locations.lock() {
            Ok(mut locations) => {
                locations.insert(entry_id, location);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(entry_id, location);
            }
        }
    }

    /// Number of entries currently handed out and not released.
    #[cfg(test)]
    pub fn resident_count(&self) -> usize {
        match self.resident.lock() {
            Ok(resident) => resident.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for PathFileProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FileProvider for PathFileProvider {
    fn resolve(&self, ids: &[EntryId]) -> Vec<LocalHandle> {
        let locations = match self.locations.lock() {
            Ok(locations) => locations.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(location) = locations.get(id) else {
                debug!("PathFileProvider: no location registered for entry {}", id);
                continue;
            };
            if !location.is_file() {
                warn!(
                    "PathFileProvider: entry {} points to missing file {}",
                    id,
                    location.display()
                );
                continue;
            }
            handles.push(LocalHandle {
                entry_id: id.clone(),
                location: location.clone(),
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            });
        }
        let mut resident = match self.resident.lock() {
            Ok(resident) => resident,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handle in &handles {
            resident.insert(handle.entry_id.clone());
        }
        handles
    }

    fn release(&self, ids: &[EntryId]) {
        let mut resident = match self.resident.lock() {
            Ok(resident) => resident,
            Err(poisoned) => poisoned.into_inner(),
        };
        for id in ids {
            resident.remove(id);
        }
        debug!(
            "PathFileProvider: released {} entries, {} still resident",
            ids.len(),
            resident.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("playhub-{}-{}", uuid::Uuid::new_v4(), name));
        std::fs::write(&path, b"not really audio").expect("write temp file");
        path
    }

    #[test]
    fn test_resolve_skips_unknown_and_missing_entries() {
        let provider = PathFileProvider::new();
        let existing = temp_file("a.mp3");
        provider.insert("a".to_string(), existing.clone());
        provider.insert("gone".to_string(), PathBuf::from("/definitely/not/here.mp3"));

        let handles = provider.resolve(&[
            "a".to_string(),
            "gone".to_string(),
            "unknown".to_string(),
        ]);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].entry_id, "a");
        assert_eq!(handles[0].location, existing);
        let _ = std::fs::remove_file(existing);
    }

    #[test]
    fn test_reacquired_handle_gets_new_generation() {
        let provider = PathFileProvider::new();
        let existing = temp_file("b.mp3");
        provider.insert("b".to_string(), existing.clone());

        let first = provider.resolve(&["b".to_string()]);
        let second = provider.resolve(&["b".to_string()]);
        assert!(second[0].generation > first[0].generation);
        let _ = std::fs::remove_file(existing);
    }

    #[test]
    fn test_release_drops_resident_entries() {
        let provider = PathFileProvider::new();
        let existing = temp_file("c.mp3");
        provider.insert("c".to_string(), existing.clone());
        provider.resolve(&["c".to_string()]);
        assert_eq!(provider.resident_count(), 1);

        provider.release(&["c".to_string()]);
        assert_eq!(provider.resident_count(), 0);
        let _ = std::fs::remove_file(existing);
    }
}
