//! Plugin registry: name → instance, category index, lifecycle state.
//!
//! Readers get an `Arc<RegistrySnapshot>` that never changes underneath
//! them. Writers build a new snapshot under a single writer lock and swap
//! it in, so iteration is never invalidated by a concurrent load or unload.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use {parlor_config::PluginConfig, tracing::info};

use crate::{
    descriptor::{PluginCategory, PluginDescriptor},
    error::{PluginError, PluginResult},
    lifecycle::LifecycleState,
    plugin::Plugin,
};

/// One loaded plugin and its bookkeeping.
#[derive(Clone)]
pub struct PluginEntry {
    pub plugin: Arc<dyn Plugin>,
    /// The descriptor the manager loaded with, including config overrides.
    pub descriptor: PluginDescriptor,
    pub config: PluginConfig,
    pub state: LifecycleState,
    /// Load order; breaks ties within a priority tier.
    pub sequence: u64,
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Immutable view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: HashMap<String, PluginEntry>,
    by_category: BTreeMap<PluginCategory, Vec<String>>,
}

impl RegistrySnapshot {
    fn from_entries(entries: HashMap<String, PluginEntry>) -> Self {
        let mut by_category: BTreeMap<PluginCategory, Vec<&PluginEntry>> = BTreeMap::new();
        for entry in entries.values() {
            by_category
                .entry(entry.descriptor.category)
                .or_default()
                .push(entry);
        }
        let by_category = by_category
            .into_iter()
            .map(|(category, mut list)| {
                list.sort_by_key(|e| (e.descriptor.priority, e.sequence));
                let names = list.iter().map(|e| e.descriptor.name.clone()).collect();
                (category, names)
            })
            .collect();
        Self {
            entries,
            by_category,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PluginEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn state(&self, name: &str) -> LifecycleState {
        self.entries
            .get(name)
            .map_or(LifecycleState::Unloaded, |e| e.state)
    }

    /// Entries of `category`, ordered by (priority, load order).
    pub fn by_category(&self, category: PluginCategory) -> Vec<&PluginEntry> {
        self.by_category
            .get(&category)
            .map(|names| names.iter().filter_map(|n| self.entries.get(n)).collect())
            .unwrap_or_default()
    }

    /// ACTIVE entries of `category`, ordered by (priority, load order).
    pub fn active(&self, category: PluginCategory) -> Vec<&PluginEntry> {
        self.by_category(category)
            .into_iter()
            .filter(|e| e.state == LifecycleState::Active)
            .collect()
    }

    /// All entries in load order.
    pub fn entries(&self) -> Vec<&PluginEntry> {
        let mut all: Vec<&PluginEntry> = self.entries.values().collect();
        all.sort_by_key(|e| e.sequence);
        all
    }

    /// Names of loaded plugins that declare `name` as a dependency.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.descriptor.dependencies.iter().any(|d| d == name))
            .map(|e| e.descriptor.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<()>,
    sequence: AtomicU64,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current registry contents. Later writes do not affect it.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn get(&self, name: &str) -> Option<PluginEntry> {
        self.snapshot().get(name).cloned()
    }

    pub fn get_by_category(&self, category: PluginCategory) -> Vec<PluginEntry> {
        self.snapshot()
            .by_category(category)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Lifecycle state of `name`; UNLOADED when it is not registered.
    pub fn get_state(&self, name: &str) -> LifecycleState {
        self.snapshot().state(name)
    }

    /// Register a plugin in LOADING state.
    pub(crate) fn add(
        &self,
        plugin: Arc<dyn Plugin>,
        descriptor: PluginDescriptor,
        config: PluginConfig,
    ) -> PluginResult<()> {
        let name = descriptor.name.clone();
        self.update(|entries| {
            if entries.contains_key(&name) {
                return Err(PluginError::AlreadyLoaded(name.clone()));
            }
            entries.insert(name.clone(), PluginEntry {
                plugin,
                descriptor,
                config,
                state: LifecycleState::Loading,
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            });
            Ok(())
        })
    }

    /// Move `name` to `state`. Reaching UNLOADED removes the entry.
    pub(crate) fn set_state(&self, name: &str, state: LifecycleState) -> PluginResult<()> {
        let from = self.update(|entries| {
            let entry = entries
                .get_mut(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            let from = entry.state;
            if !from.can_transition_to(state) {
                return Err(PluginError::InvalidTransition {
                    plugin: name.to_string(),
                    from,
                    to: state,
                });
            }
            entry.state = state;
            if state == LifecycleState::Unloaded {
                entries.remove(name);
            }
            Ok(from)
        })?;
        info!(plugin = name, %from, to = %state, "plugin state changed");
        Ok(())
    }

    /// Drop an UNLOADING plugin, returning its final entry.
    pub(crate) fn remove(&self, name: &str) -> PluginResult<PluginEntry> {
        let entry = self
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        self.set_state(name, LifecycleState::Unloaded)?;
        Ok(entry)
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, PluginEntry>) -> PluginResult<T>,
    ) -> PluginResult<T> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.snapshot().entries.clone();
        let out = f(&mut entries)?;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) =
            Arc::new(RegistrySnapshot::from_entries(entries));
        Ok(out)
    }
}
