//! Live queries over the local store.
//!
//! A live query re-runs its [`Scope`] after every store commit that touched
//! the scope's kind and calls back only when the ordered result actually
//! changed (membership, order, or any member's fields).
//!
//! # Example
//!
//! ```ignore
//! let handle = LiveQuery::subscribe(
//!   &store,
//!   Scope::children_of::<ModuleItem>(&module_key),
//!   |items: Vec<StoredRecord<ModuleItem>>| println!("{} items", items.len()),
//! )?;
//!
//! // Any commit to the store, from any use case, may trigger the callback
//! controller.refresh(&GetModules::new(course_id), true).await?;
//!
//! handle.unsubscribe();
//! ```

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cache::{Entity, RawRecord, Scope, Store, StoredRecord};
use crate::error::{Result, SyncError};

/// Entry point for live queries over entity `T`.
pub struct LiveQuery<T> {
  _entity: PhantomData<T>,
}

impl<T: Entity> LiveQuery<T> {
  /// Watch `scope` and call `on_change` with the new result whenever it changes.
  ///
  /// The result at subscription time is the baseline and is not delivered.
  /// Fails with [`SyncError::NoRuntime`] outside a tokio runtime.
  pub fn subscribe<F>(store: &Store, scope: Scope, on_change: F) -> Result<LiveHandle>
  where
    F: Fn(Vec<StoredRecord<T>>) + Send + Sync + 'static,
  {
    let runtime = Handle::try_current().map_err(|e| SyncError::NoRuntime(e.to_string()))?;

    // Subscribe before taking the baseline so no commit falls in between
    let mut commits = store.subscribe_commits();
    let (_, mut last) = evaluate(store, &scope)?;

    let weak = store.downgrade();
    let active = Arc::new(AtomicBool::new(true));
    let task_active = active.clone();
    let kind = scope.kind();

    let task = runtime.spawn(async move {
      loop {
        match commits.recv().await {
          Ok(commit) if !commit.touches(kind) => continue,
          Ok(_) => {}
          Err(RecvError::Lagged(skipped)) => {
            debug!(kind, skipped, "live query lagged, re-evaluating");
          }
          Err(RecvError::Closed) => break,
        }

        if !task_active.load(Ordering::SeqCst) {
          break;
        }
        let Some(store) = weak.upgrade() else {
          break;
        };

        let rows = match evaluate(&store, &scope) {
          Ok((rows, fingerprint)) if fingerprint != last => {
            last = fingerprint;
            rows
          }
          Ok(_) => {
            trace!(kind, "live query result unchanged");
            continue;
          }
          Err(e) => {
            warn!(kind, error = %e, "live query re-evaluation failed");
            continue;
          }
        };
        drop(store);

        let decoded: Result<Vec<StoredRecord<T>>> =
          rows.into_iter().map(RawRecord::decode::<T>).collect();
        match decoded {
          Ok(records) if task_active.load(Ordering::SeqCst) => on_change(records),
          Ok(_) => break,
          Err(e) => warn!(kind, error = %e, "live query decode failed"),
        }
      }
      trace!(kind, "live query stopped");
    });

    Ok(LiveHandle { active, task })
  }
}

/// Keeps a live query running. Dropping the handle unsubscribes.
pub struct LiveHandle {
  active: Arc<AtomicBool>,
  task: JoinHandle<()>,
}

impl LiveHandle {
  /// Stop delivering changes. Safe to call more than once, and after the
  /// store is gone.
  pub fn unsubscribe(&self) {
    if self.active.swap(false, Ordering::SeqCst) {
      self.task.abort();
    }
  }

  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::SeqCst) && !self.task.is_finished()
  }
}

impl Drop for LiveHandle {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}

/// Run the scope and fingerprint the ordered result.
fn evaluate(store: &Store, scope: &Scope) -> Result<(Vec<RawRecord>, String)> {
  let rows = store.fetch(scope)?;
  let mut hasher = Sha256::new();
  for row in &rows {
    let member = serde_json::to_vec(&(
      &row.key,
      row.position,
      row.rank,
      &row.data,
      &row.local,
    ))?;
    hasher.update((member.len() as u64).to_le_bytes());
    hasher.update(&member);
  }
  Ok((rows, hex::encode(hasher.finalize())))
}
