//! Error types shared by the fetch, cache and reconciliation layers.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors surfaced by a sync operation.
///
/// Transport and HTTP failures are passed through unchanged; the cache layer
/// never retries them itself.
#[derive(Debug, Error)]
pub enum SyncError {
  /// The request never produced a response (unreachable host, timeout, TLS).
  #[error("request to {url} failed: {message}")]
  Transport { url: String, message: String },

  /// The server answered with a non-success status.
  #[error("server returned HTTP {status} for {url}")]
  Http { status: u16, url: String },

  /// The server kept rate limiting us after all retries.
  #[error("rate limited by {url} after {attempts} attempts")]
  RateLimited { url: String, attempts: u32 },

  /// Pagination did not terminate.
  #[error("pagination for {url} exceeded {pages} pages")]
  Pagination { url: String, pages: usize },

  /// The payload did not match the expected shape.
  #[error("failed to decode {context}: {source}")]
  Decode {
    context: String,
    #[source]
    source: serde_json::Error,
  },

  /// A server record failed validation; the whole batch was rolled back.
  #[error("invalid {kind} record {key}: {reason}")]
  InvalidRecord {
    kind: &'static str,
    key: String,
    reason: String,
  },

  /// The local store rejected a read or a commit.
  #[error("store error: {0}")]
  Store(#[from] rusqlite::Error),

  /// Stored data could not be serialized or read back.
  #[error("serialization error: {0}")]
  Serialize(#[from] serde_json::Error),

  /// A stored value is unreadable (e.g. a malformed timestamp).
  #[error("corrupt cache entry: {0}")]
  Corrupt(String),

  #[error("invalid url: {0}")]
  Url(#[from] url::ParseError),

  /// The store mutex was poisoned by a panicking writer.
  #[error("store lock poisoned")]
  LockPoisoned,

  /// The refresh was cancelled by its owner before it committed.
  #[error("refresh of {key} was cancelled")]
  Cancelled { key: String },

  /// Background work was requested outside a tokio runtime.
  #[error("no tokio runtime available: {0}")]
  NoRuntime(String),

  /// A newer forced refresh for the same key took over.
  #[error("refresh of {key} was superseded by a newer refresh")]
  Superseded { key: String },
}

impl SyncError {
  /// Whether the failure is likely temporary, so serving stale cache is reasonable.
  pub fn is_transient(&self) -> bool {
    match self {
      SyncError::Transport { .. }
      | SyncError::RateLimited { .. }
      | SyncError::Cancelled { .. }
      | SyncError::Superseded { .. } => true,
      SyncError::Http { status, .. } => *status >= 500 || *status == 429,
      _ => false,
    }
  }

  /// Whether the refresh was abandoned rather than failed.
  pub fn is_cancellation(&self) -> bool {
    matches!(
      self,
      SyncError::Cancelled { .. } | SyncError::Superseded { .. }
    )
  }
}
