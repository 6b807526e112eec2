//! Refresh controller that gates network fetches on a per-key time-to-live.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::reconcile::ReconcileReport;
use super::scope::Scope;
use super::storage::{Store, StoredRecord, Transaction};
use super::traits::{CacheResult, Entity};
use crate::api::Fetcher;
use crate::error::{Result, SyncError};

/// Default time-to-live for cached data.
pub const DEFAULT_TTL_MINUTES: i64 = 120;

/// Refresh attempts `load` makes while being superseded.
const MAX_LOAD_ATTEMPTS: u32 = 3;

/// A cached read: which key and scope it owns, how to fetch, how to write.
#[async_trait]
pub trait UseCase: Send + Sync {
  /// Typed network response handed to `write`
  type Response: Send;
  /// Entity read back through `scope`
  type Model: Entity;

  fn cache_key(&self) -> String;

  fn scope(&self) -> Scope;

  /// Network step. Must not touch the store.
  async fn make_request(&self, fetcher: &Fetcher) -> Result<Self::Response>;

  /// Store step, run inside the same unit of work as the TTL stamp.
  fn write(&self, tx: &mut Transaction<'_>, response: Self::Response) -> Result<ReconcileReport>;
}

/// Source of "now" for TTL decisions.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Owner side of a cancellable refresh.
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

impl CancelHandle {
  pub fn cancel(&self) {
    let _ = self.tx.send(true);
  }
}

/// Refresh side of a cancellable refresh.
#[derive(Clone)]
pub struct CancelSignal {
  rx: watch::Receiver<bool>,
}

impl CancelSignal {
  /// A linked handle and signal.
  pub fn pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
  }

  /// A signal that never fires.
  pub fn never() -> Self {
    CancelSignal::pair().1
  }

  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once cancelled. Pends forever if the handle is dropped uncancelled.
  pub async fn cancelled(&self) {
    let mut rx = self.rx.clone();
    loop {
      let fired = *rx.borrow_and_update();
      if fired {
        return;
      }
      if rx.changed().await.is_err() {
        std::future::pending::<()>().await;
      }
    }
  }
}

/// What a refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
  /// Data was still fresh; no network call was made.
  Cached,
  /// Data was fetched and reconciled.
  Fetched(ReconcileReport),
}

/// TTL state of one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlStatus {
  pub last_refresh: Option<DateTime<Utc>>,
  pub expires_at: Option<DateTime<Utc>>,
  pub stale: bool,
}

/// Decides when to hit the network and commits fetched data with its TTL stamp.
#[derive(Clone)]
pub struct RefreshController {
  store: Store,
  fetcher: Fetcher,
  /// How long before cached data is considered stale
  ttl: Duration,
  clock: Arc<dyn Clock>,
  /// Latest refresh generation per cache key
  generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl RefreshController {
  pub fn new(store: Store, fetcher: Fetcher) -> Self {
    Self {
      store,
      fetcher,
      ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
      clock: Arc::new(SystemClock),
      generations: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  pub fn fetcher(&self) -> &Fetcher {
    &self.fetcher
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// True when `cache_key` was never refreshed or its TTL has run out.
  pub fn should_force_refresh(&self, cache_key: &str) -> Result<bool> {
    Ok(self.status(cache_key)?.stale)
  }

  pub fn status(&self, cache_key: &str) -> Result<TtlStatus> {
    let last_refresh = self.store.last_refresh(cache_key)?;
    let stale = match last_refresh {
      None => true,
      Some(at) => self.clock.now() - at > self.ttl,
    };
    Ok(TtlStatus {
      last_refresh,
      expires_at: last_refresh.map(|at| at + self.ttl),
      stale,
    })
  }

  /// Refresh `use_case` if stale, or unconditionally when `force` is set.
  pub async fn refresh<U: UseCase>(&self, use_case: &U, force: bool) -> Result<RefreshOutcome> {
    self
      .refresh_with_cancel(use_case, force, &CancelSignal::never())
      .await
  }

  /// Like [`refresh`](Self::refresh), abandoning the work when `cancel` fires.
  ///
  /// The TTL stamp is written in the same unit of work as the data, so a
  /// failed, cancelled or superseded refresh never advances it.
  pub async fn refresh_with_cancel<U: UseCase>(
    &self,
    use_case: &U,
    force: bool,
    cancel: &CancelSignal,
  ) -> Result<RefreshOutcome> {
    let key = use_case.cache_key();

    if !force && !self.should_force_refresh(&key)? {
      debug!(%key, "cache fresh, skipping refresh");
      return Ok(RefreshOutcome::Cached);
    }

    let generation = self.begin(&key, force);
    debug!(%key, force, generation, "refreshing");

    let response = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        info!(%key, "refresh cancelled");
        return Err(SyncError::Cancelled { key });
      }
      response = use_case.make_request(&self.fetcher) => response,
    };

    let response = match response {
      Ok(response) => response,
      Err(e) => {
        warn!(%key, error = %e, "refresh failed");
        return Err(e);
      }
    };

    if cancel.is_cancelled() {
      return Err(SyncError::Cancelled { key });
    }

    let now = self.clock.now();
    let report = self.store.write(|tx| {
      // Checked under the writer lock so a superseded refresh cannot commit
      if !self.is_current(&key, generation) {
        return Err(SyncError::Superseded { key: key.clone() });
      }
      let report = use_case.write(tx, response)?;
      tx.stamp_refresh(&key, now)?;
      Ok(report)
    })?;

    info!(
      %key,
      inserted = report.inserted.len(),
      updated = report.updated.len(),
      deleted = report.deleted.len(),
      "refreshed"
    );
    Ok(RefreshOutcome::Fetched(report))
  }

  /// Refresh, then read the use case's scope.
  ///
  /// A failed refresh still answers from cache when a previous refresh
  /// succeeded or rows exist, marking the result offline. A refresh
  /// overtaken by a newer one is retried without forcing, so it either finds
  /// the newer data fresh or fetches it itself.
  pub async fn load<U: UseCase>(
    &self,
    use_case: &U,
    force: bool,
  ) -> Result<CacheResult<Vec<StoredRecord<U::Model>>>> {
    let key = use_case.cache_key();
    let scope = use_case.scope();

    let mut outcome = self.refresh(use_case, force).await;
    let mut attempts = 1;
    while attempts < MAX_LOAD_ATTEMPTS && matches!(outcome, Err(SyncError::Superseded { .. })) {
      debug!(%key, attempts, "refresh superseded, retrying");
      outcome = self.refresh(use_case, false).await;
      attempts += 1;
    }

    match outcome {
      Ok(RefreshOutcome::Cached) => {
        let data = self.store.fetch_typed(&scope)?;
        Ok(CacheResult::from_cache(data, self.store.last_refresh(&key)?))
      }
      Ok(RefreshOutcome::Fetched(_)) => {
        let data = self.store.fetch_typed(&scope)?;
        let cached_at = self
          .store
          .last_refresh(&key)?
          .unwrap_or_else(|| self.clock.now());
        Ok(CacheResult::from_network(data, cached_at))
      }
      Err(error @ (SyncError::Superseded { .. } | SyncError::Cancelled { .. })) => Err(error),
      Err(error) => {
        let cached_at = self.store.last_refresh(&key)?;
        let data = self.store.fetch_typed(&scope)?;
        if cached_at.is_none() && data.is_empty() {
          return Err(error);
        }
        warn!(%key, error = %error, "serving cached data offline");
        Ok(CacheResult::offline(data, cached_at, error))
      }
    }
  }

  /// Drop the TTL record of `cache_key`; the next refresh goes to the network.
  pub fn invalidate(&self, cache_key: &str) -> Result<bool> {
    self.store.write(|tx| {
      self.bump(|key| key == cache_key);
      tx.clear_refresh(cache_key)
    })
  }

  pub fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
    self.store.write(|tx| {
      self.bump(|key| key.starts_with(prefix));
      tx.clear_refresh_prefix(prefix)
    })
  }

  pub fn invalidate_all(&self) -> Result<usize> {
    self.store.write(|tx| {
      self.bump(|_| true);
      tx.clear_all_refresh()
    })
  }

  /// Supersede every in-flight refresh, then drop all TTL records and all
  /// cached rows in one unit of work.
  ///
  /// Returns `(records, refresh_stamps)` removed.
  pub fn purge(&self) -> Result<(usize, usize)> {
    self.store.write(|tx| {
      self.bump(|_| true);
      let stamps = tx.clear_all_refresh()?;
      let records = tx.purge_all()?;
      Ok((records, stamps))
    })
  }

  fn generations(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
    self
      .generations
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Register a refresh. A forced refresh supersedes every in-flight one.
  fn begin(&self, key: &str, force: bool) -> u64 {
    let mut generations = self.generations();
    let generation = generations.entry(key.to_string()).or_insert(0);
    if force {
      *generation += 1;
    }
    *generation
  }

  fn is_current(&self, key: &str, generation: u64) -> bool {
    self.generations().get(key).copied().unwrap_or(0) == generation
  }

  /// Supersede in-flight refreshes of matching keys.
  fn bump(&self, matches: impl Fn(&str) -> bool) {
    for (key, generation) in self.generations().iter_mut() {
      if matches(key) {
        *generation += 1;
      }
    }
  }
}
