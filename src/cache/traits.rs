//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::SyncError;

/// Trait for entities that can be cached and reconciled.
///
/// Implementors provide a natural key that is stable across server responses.
/// Keys only need to be unique within one `kind()`.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Entity type name for storage organization (e.g., "module", "module_item")
  fn kind() -> &'static str;

  /// Server-assigned identifier, namespaced by its parent where ids collide
  /// across parents (e.g. `"<courseID>/<itemID>"`).
  fn natural_key(&self) -> String;

  /// Natural key of the owning record, if any.
  fn parent_key(&self) -> Option<String> {
    None
  }

  /// Server-assigned position among siblings.
  fn position(&self) -> Option<i64> {
    None
  }

  /// Reject payloads that decoded but cannot be stored meaningfully.
  fn validate(&self) -> Result<(), String> {
    Ok(())
  }

  /// A synthetic sibling this record asks for, placed right after it.
  fn derived(&self) -> Option<Derived<Self>> {
    None
  }
}

/// A synthetic record produced while reconciling its trigger.
///
/// The stored key is always `"<triggerKey>-<suffix>"`.
#[derive(Debug, Clone)]
pub struct Derived<T> {
  pub suffix: &'static str,
  pub record: T,
}

impl<T> Derived<T> {
  pub fn new(suffix: &'static str, record: T) -> Self {
    Self { suffix, record }
  }

  pub fn key_for(&self, trigger_key: &str) -> String {
    format!("{}-{}", trigger_key, self.suffix)
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the cache key was last refreshed successfully (if known)
  pub cached_at: Option<DateTime<Utc>>,
  /// The refresh failure that forced an offline answer
  pub error: Option<SyncError>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: Some(cached_at),
      error: None,
    }
  }

  /// Create a new cache result from cached data that is still fresh.
  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at,
      error: None,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>, error: SyncError) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
      error: Some(error),
    }
  }

  pub fn is_offline(&self) -> bool {
    self.source == CacheSource::Offline
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
      error: self.error,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still within its time-to-live
  CacheFresh,
  /// Offline mode - the refresh failed, serving cached data
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Network => write!(f, "network"),
      CacheSource::CacheFresh => write!(f, "cache"),
      CacheSource::Offline => write!(f, "offline"),
    }
  }
}
