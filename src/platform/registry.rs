//! Name and alias table of runner factories.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::{Runner, RunnerContext};

/// Builds a runner for one job.
pub type Factory = Arc<dyn Fn(RunnerContext) -> Box<dyn Runner> + Send + Sync>;

/// Errors produced by registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown platform: {name} (available: {available})")]
    UnknownPlatform { name: String, available: String },
}

struct Entry {
    canonical: String,
    factory: Factory,
}

/// Runner factories keyed by normalized name and alias.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish_non_exhaustive()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trims and lowercases a name.
    #[must_use]
    pub fn normalize(name: &str) -> String {
        name.trim().to_lowercase()
    }

    /// Registers a factory under `name` and each alias.
    ///
    /// Blank aliases are ignored.
    ///
    /// # Panics
    ///
    /// Panics when the name or an alias is already registered. Registration
    /// happens once at startup, so a clash is a programming error.
    pub fn register<F>(&mut self, name: &str, aliases: &[&str], factory: F)
    where
        F: Fn(RunnerContext) -> Box<dyn Runner> + Send + Sync + 'static,
    {
        let canonical = Self::normalize(name);
        let factory: Factory = Arc::new(factory);
        for key in std::iter::once(name).chain(aliases.iter().copied()) {
            let key = Self::normalize(key);
            if key.is_empty() {
                continue;
            }
            assert!(
                !self.entries.contains_key(&key),
                "platform: duplicate register: {key}"
            );
            self.entries.insert(
                key,
                Entry {
                    canonical: canonical.clone(),
                    factory: Arc::clone(&factory),
                },
            );
        }
    }

    /// Canonical name for a name or alias.
    #[must_use]
    pub fn canonical(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&Self::normalize(name))
            .map(|entry| entry.canonical.as_str())
    }

    /// Whether the name or alias is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.canonical(name).is_some()
    }

    /// Builds the runner for a name or alias.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownPlatform`] listing the registered
    /// platforms.
    pub fn create(&self, name: &str, ctx: RunnerContext) -> Result<Box<dyn Runner>, RegistryError> {
        match self.entries.get(&Self::normalize(name)) {
            Some(entry) => Ok((entry.factory)(ctx)),
            None => Err(RegistryError::UnknownPlatform {
                name: name.to_string(),
                available: self.names().join(", "),
            }),
        }
    }

    /// Sorted canonical names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|entry| entry.canonical.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
