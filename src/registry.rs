//! Lifetime-scoped registry of shared per-key objects.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Hands out one shared instance per key for as long as the registry lives.
///
/// Owned by the session, so nothing leaks across sessions or tests.
pub struct Registry<K, V> {
  entries: Mutex<HashMap<K, Arc<V>>>,
}

impl<K: Eq + Hash + Clone, V> Default for Registry<K, V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: Eq + Hash + Clone, V> Registry<K, V> {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<K, Arc<V>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The instance for `key`, created with `make` on first use.
  pub fn get_or_insert_with(&self, key: &K, make: impl FnOnce() -> V) -> Arc<V> {
    self
      .entries()
      .entry(key.clone())
      .or_insert_with(|| Arc::new(make()))
      .clone()
  }

  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    self.entries().get(key).cloned()
  }

  pub fn remove(&self, key: &K) -> Option<Arc<V>> {
    self.entries().remove(key)
  }

  /// Forget every instance. Outstanding `Arc`s stay valid.
  pub fn clear(&self) {
    self.entries().clear();
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }
}
