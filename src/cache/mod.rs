//! Local cache: store, scopes, reconciliation and the TTL refresh controller.
//!
//! Records are persisted with a stable identity per `(kind, natural key)`,
//! server-owned fields are replaced on every reconcile, and local-only fields
//! survive untouched. Every write runs as one atomic unit of work and
//! broadcasts a [`CommitEvent`] that live queries react to.

mod key;
mod layer;
mod reconcile;
mod scope;
mod storage;
mod traits;

pub use key::CacheKey;
pub use layer::{
  CancelHandle, CancelSignal, Clock, RefreshController, RefreshOutcome, SystemClock,
  TtlStatus, UseCase, DEFAULT_TTL_MINUTES,
};
pub use reconcile::{reconcile, reconcile_tree, Listing, Node, ReconcileReport};
pub use scope::{Direction, Predicate, Scope, SortField, SortKey};
pub use storage::{
  CommitEvent, RawRecord, RecordFields, RecordId, Repository, Store, StoredRecord, Transaction,
  Upsert, WeakStore,
};
pub use traits::{CacheResult, CacheSource, Derived, Entity};
