//! Concurrent flag store.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Mapping from flag name to its single byte value.
///
/// Every operation takes the lock exactly once, so operations are
/// linearizable with respect to each other.
#[derive(Debug, Default)]
pub struct FlagStore {
    flags: RwLock<HashMap<String, u8>>,
}

impl FlagStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u8> {
        self.flags.read().get(name).copied()
    }

    /// Insert `name` only if it does not exist yet.
    ///
    /// Returns `false` and leaves the stored value untouched when the flag is
    /// already present.
    pub fn set_if_absent(&self, name: &str, value: u8) -> bool {
        let mut flags = self.flags.write();
        if flags.contains_key(name) {
            return false;
        }
        flags.insert(name.to_owned(), value);
        true
    }

    /// Insert or overwrite `name`, returning the value now stored.
    pub fn update(&self, name: &str, value: u8) -> u8 {
        self.flags.write().insert(name.to_owned(), value);
        value
    }

    /// Delete `name`. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.flags.write().remove(name).is_some()
    }

    /// Number of stored flags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.read().len()
    }

    /// Whether the store holds no flags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.read().is_empty()
    }

    /// All flags sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, u8)> {
        let mut flags: Vec<(String, u8)> = self
            .flags
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        flags.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        flags
    }
}
