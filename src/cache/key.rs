//! Cache key construction.

use std::fmt;

/// Cache key following the `"<resource>-<parentID>-<childID...>"` convention.
///
/// Two use cases that share a key share TTL state, so every distinct scope
/// needs its own key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(resource: &str) -> Self {
    Self(resource.to_string())
  }

  /// Append one identifier segment.
  pub fn part(mut self, id: impl fmt::Display) -> Self {
    self.0.push('-');
    self.0.push_str(&id.to_string());
    self
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Prefix matching this key and every key built from it with more parts.
  pub fn prefix(&self) -> String {
    format!("{}-", self.0)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<CacheKey> for String {
  fn from(key: CacheKey) -> Self {
    key.0
  }
}
