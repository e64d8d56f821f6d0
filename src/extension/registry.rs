//! Unified source registry
//!
//! The only state shared across extensions. Lookups run concurrently with loads and
//! unloads, so every operation takes the lock for the shortest possible span and never
//! calls into foreign code while holding it.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::Serialize;

use super::adapter::SourceHandle;
use super::catalogue::CatalogueSource;

struct RegistryEntry {
    handle: SourceHandle,
    package_name: String,
}

/// One row of [`SourceRegistry::snapshot`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RegistryRow {
    pub id: i64,
    pub name: String,
    pub lang: String,
    pub package_name: String,
}

/// Outcome of registering one package's sources
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Registration {
    pub registered: Vec<i64>,
    /// Ids already owned by another package; these sources were not registered
    pub conflicts: Vec<i64>,
}

#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<i64, RegistryEntry>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every handle of `package_name`
    ///
    /// The first package to claim an id keeps it. A package re-registering its own id
    /// replaces its previous handle. Within one call only the first handle per id counts.
    pub fn register_all(&self, package_name: &str, handles: &[SourceHandle]) -> Registration {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        insert_handles(&mut sources, package_name, handles)
    }

    /// Swap a package's registered handles for `handles` under a single write lock
    ///
    /// Readers see either the old set or the new one, never a package with no sources.
    pub fn replace_package(&self, package_name: &str, handles: &[SourceHandle]) -> Registration {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        sources.retain(|_, entry| entry.package_name != package_name);
        insert_handles(&mut sources, package_name, handles)
    }

    /// Remove every handle owned by `package_name`, returning the removed ids
    pub fn remove_package(&self, package_name: &str) -> Vec<i64> {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        let mut removed: Vec<i64> = sources
            .iter()
            .filter(|(_, entry)| entry.package_name == package_name)
            .map(|(id, _)| *id)
            .collect();
        for id in &removed {
            sources.remove(id);
        }
        removed.sort_unstable();
        removed
    }

    pub fn get(&self, id: i64) -> Option<SourceHandle> {
        self.read().get(&id).map(|entry| entry.handle.clone())
    }

    pub fn owner(&self, id: i64) -> Option<String> {
        self.read().get(&id).map(|entry| entry.package_name.clone())
    }

    pub fn all(&self) -> Vec<SourceHandle> {
        self.read().values().map(|entry| entry.handle.clone()).collect()
    }

    pub fn package_sources(&self, package_name: &str) -> Vec<SourceHandle> {
        self.read()
            .values()
            .filter(|entry| entry.package_name == package_name)
            .map(|entry| entry.handle.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted view of the registry contents
    pub fn snapshot(&self) -> Vec<RegistryRow> {
        let mut rows: Vec<RegistryRow> = self
            .read()
            .iter()
            .map(|(id, entry)| RegistryRow {
                id: *id,
                name: entry.handle.name().to_string(),
                lang: entry.handle.lang().to_string(),
                package_name: entry.package_name.clone(),
            })
            .collect();
        rows.sort();
        rows
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<i64, RegistryEntry>> {
        self.sources.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn insert_handles(
    sources: &mut HashMap<i64, RegistryEntry>,
    package_name: &str,
    handles: &[SourceHandle],
) -> Registration {
    let mut outcome = Registration::default();
    let mut seen = HashSet::with_capacity(handles.len());

    for handle in handles {
        let id = handle.id();
        if !seen.insert(id) {
            tracing::warn!(
                source_id = id,
                package = %package_name,
                name = %handle.name(),
                "Package declares the same source id twice, skipping duplicate"
            );
            outcome.conflicts.push(id);
            continue;
        }

        if let Some(existing) = sources.get(&id) {
            if existing.package_name != package_name {
                tracing::warn!(
                    source_id = id,
                    package = %package_name,
                    owner = %existing.package_name,
                    "Source id already registered by another package, skipping"
                );
                outcome.conflicts.push(id);
                continue;
            }
        }

        sources.insert(
            id,
            RegistryEntry {
                handle: handle.clone(),
                package_name: package_name.to_string(),
            },
        );
        outcome.registered.push(id);
    }

    outcome
}
