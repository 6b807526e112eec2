//! SQLite-backed local store with atomic units of work.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::scope::Scope;
use super::traits::Entity;
use crate::error::{Result, SyncError};

/// Default commit notification channel capacity.
pub const DEFAULT_COMMIT_CAPACITY: usize = 64;

/// Storage identity of a row. Stable for the lifetime of the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub i64);

/// A stored row with its payload still in JSON form.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
  pub id: RecordId,
  pub kind: String,
  pub key: String,
  pub parent: Option<String>,
  pub position: i64,
  /// 0 for server records, 1 for a synthetic record following its trigger
  pub rank: i64,
  pub derived_from: Option<String>,
  /// Server-owned fields
  pub data: Value,
  /// Local-only fields, never touched by reconciliation
  pub local: Map<String, Value>,
  pub updated_at: DateTime<Utc>,
}

impl RawRecord {
  /// Decode the payload into its entity type.
  pub fn decode<T: Entity>(self) -> Result<StoredRecord<T>> {
    let data = serde_json::from_value(self.data).map_err(|source| SyncError::Decode {
      context: format!("cached {} {}", self.kind, self.key),
      source,
    })?;
    Ok(StoredRecord {
      id: self.id,
      key: self.key,
      parent: self.parent,
      position: self.position,
      rank: self.rank,
      derived_from: self.derived_from,
      data,
      local: self.local,
      updated_at: self.updated_at,
    })
  }

  /// Whether writing `fields` would change nothing server-owned.
  pub fn same_fields(&self, fields: &RecordFields) -> bool {
    self.kind == fields.kind
      && self.key == fields.key
      && self.parent == fields.parent
      && self.position == fields.position
      && self.rank == fields.rank
      && self.derived_from == fields.derived_from
      && self.data == fields.data
  }

  pub fn is_synthetic(&self) -> bool {
    self.derived_from.is_some()
  }
}

/// A stored row with a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord<T> {
  pub id: RecordId,
  pub key: String,
  pub parent: Option<String>,
  pub position: i64,
  pub rank: i64,
  pub derived_from: Option<String>,
  pub data: T,
  pub local: Map<String, Value>,
  pub updated_at: DateTime<Utc>,
}

impl<T> StoredRecord<T> {
  pub fn is_synthetic(&self) -> bool {
    self.derived_from.is_some()
  }

  pub fn local_flag(&self, name: &str) -> bool {
    self.local.get(name).and_then(Value::as_bool).unwrap_or(false)
  }
}

/// Server-owned column values for an insert or update.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFields {
  pub kind: String,
  pub key: String,
  pub parent: Option<String>,
  pub position: i64,
  pub rank: i64,
  pub derived_from: Option<String>,
  pub data: Value,
}

/// Outcome of a find-or-create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
  Inserted(RecordId),
  Updated(RecordId),
  Unchanged(RecordId),
}

impl Upsert {
  pub fn id(&self) -> RecordId {
    match self {
      Upsert::Inserted(id) | Upsert::Updated(id) | Upsert::Unchanged(id) => *id,
    }
  }
}

/// Store operations the reconciler relies on.
///
/// All calls made through one value belong to one unit of work.
pub trait Repository {
  fn find(&self, kind: &str, key: &str) -> Result<Option<RawRecord>>;

  /// Rows in `scope`, in scope order.
  fn fetch(&self, scope: &Scope) -> Result<Vec<RawRecord>>;

  /// Synthetic rows created for `trigger_key`.
  fn derived_of(&self, kind: &str, trigger_key: &str) -> Result<Vec<RawRecord>>;

  fn insert(&mut self, fields: &RecordFields) -> Result<RecordId>;

  /// Overwrite server-owned columns, keeping local fields.
  fn update(&mut self, id: RecordId, fields: &RecordFields) -> Result<()>;

  fn delete(&mut self, id: RecordId) -> Result<bool>;

  fn set_local(&mut self, id: RecordId, local: &Map<String, Value>) -> Result<()>;

  /// Find by `(kind, key)` and update in place, or insert.
  fn upsert(&mut self, fields: &RecordFields) -> Result<Upsert> {
    match self.find(&fields.kind, &fields.key)? {
      Some(existing) if existing.same_fields(fields) => Ok(Upsert::Unchanged(existing.id)),
      Some(existing) => {
        self.update(existing.id, fields)?;
        Ok(Upsert::Updated(existing.id))
      }
      None => Ok(Upsert::Inserted(self.insert(fields)?)),
    }
  }
}

/// Notification sent after every commit that touched records.
#[derive(Debug, Clone)]
pub struct CommitEvent {
  pub version: u64,
  pub kinds: Arc<BTreeSet<String>>,
}

impl CommitEvent {
  pub fn touches(&self, kind: &str) -> bool {
    self.kinds.contains(kind)
  }
}

struct StoreInner {
  conn: Mutex<Connection>,
  version: AtomicU64,
  commits: broadcast::Sender<CommitEvent>,
}

/// Single-writer local store.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct Store {
  inner: Arc<StoreInner>,
}

/// Non-owning reference to a [`Store`].
#[derive(Clone)]
pub struct WeakStore {
  inner: Weak<StoreInner>,
}

impl WeakStore {
  pub fn upgrade(&self) -> Option<Store> {
    self.inner.upgrade().map(|inner| Store { inner })
  }
}

impl Store {
  /// Open (or create) a store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        SyncError::Corrupt(format!(
          "failed to create cache directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path)?;
    debug!(path = %path.display(), "opened cache database");
    Self::with_connection(conn)
  }

  /// Open a private in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  /// Get the default database path.
  pub fn default_path() -> Option<PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
    Some(data_dir.join("coursesync").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      inner: Arc::new(StoreInner {
        conn: Mutex::new(conn),
        version: AtomicU64::new(0),
        commits: broadcast::channel(DEFAULT_COMMIT_CAPACITY).0,
      }),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.inner.conn.lock().map_err(|_| SyncError::LockPoisoned)
  }

  pub fn downgrade(&self) -> WeakStore {
    WeakStore {
      inner: Arc::downgrade(&self.inner),
    }
  }

  /// Receive a [`CommitEvent`] for every commit that touched records.
  pub fn subscribe_commits(&self) -> broadcast::Receiver<CommitEvent> {
    self.inner.commits.subscribe()
  }

  /// Number of record-touching commits so far.
  pub fn version(&self) -> u64 {
    self.inner.version.load(Ordering::SeqCst)
  }

  /// Run `f` as one atomic unit of work.
  ///
  /// Commits when `f` returns `Ok`, rolls everything back otherwise.
  /// Writers are serialized by the connection lock.
  pub fn write<R>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<R>) -> Result<R> {
    let mut conn = self.lock()?;
    let mut tx = Transaction {
      tx: conn.transaction()?,
      touched: BTreeSet::new(),
      now: Utc::now(),
    };

    let value = f(&mut tx)?;
    let touched = tx.commit()?;
    drop(conn);

    if !touched.is_empty() {
      let version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;
      trace!(version, kinds = ?touched, "store commit");
      // No receivers is fine
      let _ = self.inner.commits.send(CommitEvent {
        version,
        kinds: Arc::new(touched),
      });
    }

    Ok(value)
  }

  /// Rows in `scope`, in scope order.
  pub fn fetch(&self, scope: &Scope) -> Result<Vec<RawRecord>> {
    let conn = self.lock()?;
    query_scope(&conn, scope)
  }

  /// Typed rows in `scope`, in scope order.
  pub fn fetch_typed<T: Entity>(&self, scope: &Scope) -> Result<Vec<StoredRecord<T>>> {
    self
      .fetch(scope)?
      .into_iter()
      .map(RawRecord::decode::<T>)
      .collect()
  }

  pub fn find<T: Entity>(&self, key: &str) -> Result<Option<StoredRecord<T>>> {
    let conn = self.lock()?;
    find_record(&conn, T::kind(), key)?
      .map(RawRecord::decode::<T>)
      .transpose()
  }

  /// When `cache_key` was last refreshed successfully.
  pub fn last_refresh(&self, cache_key: &str) -> Result<Option<DateTime<Utc>>> {
    let conn = self.lock()?;
    let value: Option<String> = conn
      .query_row(
        "SELECT last_refresh FROM refresh_ttl WHERE cache_key = ?",
        params![cache_key],
        |row| row.get(0),
      )
      .optional()?;

    value.as_deref().map(parse_datetime).transpose()
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Entity records (server payload stored as JSON)
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    parent_key TEXT,
    position INTEGER NOT NULL DEFAULT 0,
    sub_position INTEGER NOT NULL DEFAULT 0,
    derived_from TEXT,
    data TEXT NOT NULL,
    local TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL,
    UNIQUE (kind, natural_key)
);

CREATE INDEX IF NOT EXISTS idx_records_parent ON records(kind, parent_key);
CREATE INDEX IF NOT EXISTS idx_records_derived ON records(kind, derived_from);

-- Last successful refresh per cache key
CREATE TABLE IF NOT EXISTS refresh_ttl (
    cache_key TEXT PRIMARY KEY,
    last_refresh TEXT NOT NULL
);
"#;

const RECORD_COLUMNS: &str =
  "id, kind, natural_key, parent_key, position, sub_position, derived_from, data, local, updated_at";

/// One unit of work against the store.
pub struct Transaction<'c> {
  tx: rusqlite::Transaction<'c>,
  touched: BTreeSet<String>,
  now: DateTime<Utc>,
}

impl Transaction<'_> {
  fn commit(self) -> Result<BTreeSet<String>> {
    self.tx.commit()?;
    Ok(self.touched)
  }

  fn touch(&mut self, kind: &str) {
    if !self.touched.contains(kind) {
      self.touched.insert(kind.to_string());
    }
  }

  /// Record a successful refresh of `cache_key`.
  pub fn stamp_refresh(&mut self, cache_key: &str, at: DateTime<Utc>) -> Result<()> {
    self.tx.execute(
      "INSERT OR REPLACE INTO refresh_ttl (cache_key, last_refresh) VALUES (?, ?)",
      params![cache_key, at.to_rfc3339()],
    )?;
    Ok(())
  }

  /// Forget the refresh time of `cache_key`. Returns whether one existed.
  pub fn clear_refresh(&mut self, cache_key: &str) -> Result<bool> {
    let removed = self.tx.execute(
      "DELETE FROM refresh_ttl WHERE cache_key = ?",
      params![cache_key],
    )?;
    Ok(removed > 0)
  }

  /// Forget every refresh time whose key starts with `prefix`.
  /// Case-sensitive, unlike `LIKE`.
  pub fn clear_refresh_prefix(&mut self, prefix: &str) -> Result<usize> {
    let removed = self.tx.execute(
      "DELETE FROM refresh_ttl WHERE substr(cache_key, 1, length(?1)) = ?1",
      params![prefix],
    )?;
    Ok(removed)
  }

  pub fn clear_all_refresh(&mut self) -> Result<usize> {
    Ok(self.tx.execute("DELETE FROM refresh_ttl", [])?)
  }

  /// Delete every record of `kind`.
  pub fn purge_kind(&mut self, kind: &str) -> Result<usize> {
    let removed = self
      .tx
      .execute("DELETE FROM records WHERE kind = ?", params![kind])?;
    if removed > 0 {
      self.touch(kind);
    }
    Ok(removed)
  }

  /// Delete every record.
  pub fn purge_all(&mut self) -> Result<usize> {
    let kinds: Vec<String> = {
      let mut stmt = self.tx.prepare("SELECT DISTINCT kind FROM records")?;
      let rows = stmt.query_map([], |row| row.get(0))?;
      let kinds = rows.collect::<rusqlite::Result<Vec<String>>>()?;
      kinds
    };
    let removed = self.tx.execute("DELETE FROM records", [])?;
    for kind in kinds {
      self.touch(&kind);
    }
    Ok(removed)
  }

  pub fn find_typed<T: Entity>(&self, key: &str) -> Result<Option<StoredRecord<T>>> {
    self
      .find(T::kind(), key)?
      .map(RawRecord::decode::<T>)
      .transpose()
  }

  pub fn fetch_typed<T: Entity>(&self, scope: &Scope) -> Result<Vec<StoredRecord<T>>> {
    self
      .fetch(scope)?
      .into_iter()
      .map(RawRecord::decode::<T>)
      .collect()
  }
}

impl Repository for Transaction<'_> {
  fn find(&self, kind: &str, key: &str) -> Result<Option<RawRecord>> {
    find_record(&self.tx, kind, key)
  }

  fn fetch(&self, scope: &Scope) -> Result<Vec<RawRecord>> {
    query_scope(&self.tx, scope)
  }

  fn derived_of(&self, kind: &str, trigger_key: &str) -> Result<Vec<RawRecord>> {
    let sql = format!(
      "SELECT {} FROM records WHERE kind = ? AND derived_from = ? ORDER BY id",
      RECORD_COLUMNS
    );
    let mut stmt = self.tx.prepare(&sql)?;
    let rows = stmt.query_map(params![kind, trigger_key], RowParts::from_row)?;
    let records = rows
      .map(|parts| parts.map_err(SyncError::from).and_then(RowParts::into_record))
      .collect::<Result<Vec<_>>>()?;
    Ok(records)
  }

  fn insert(&mut self, fields: &RecordFields) -> Result<RecordId> {
    let data = serde_json::to_string(&fields.data)?;
    self.tx.execute(
      "INSERT INTO records (kind, natural_key, parent_key, position, sub_position, derived_from, data, local, updated_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, '{}', ?)",
      params![
        fields.kind,
        fields.key,
        fields.parent,
        fields.position,
        fields.rank,
        fields.derived_from,
        data,
        self.now.to_rfc3339()
      ],
    )?;
    let id = RecordId(self.tx.last_insert_rowid());
    self.touch(&fields.kind);
    trace!(kind = %fields.kind, key = %fields.key, id = id.0, "inserted record");
    Ok(id)
  }

  fn update(&mut self, id: RecordId, fields: &RecordFields) -> Result<()> {
    let data = serde_json::to_string(&fields.data)?;
    self.tx.execute(
      "UPDATE records
       SET natural_key = ?, parent_key = ?, position = ?, sub_position = ?, derived_from = ?, data = ?, updated_at = ?
       WHERE id = ?",
      params![
        fields.key,
        fields.parent,
        fields.position,
        fields.rank,
        fields.derived_from,
        data,
        self.now.to_rfc3339(),
        id.0
      ],
    )?;
    self.touch(&fields.kind);
    Ok(())
  }

  fn delete(&mut self, id: RecordId) -> Result<bool> {
    let kind: Option<String> = self
      .tx
      .query_row(
        "SELECT kind FROM records WHERE id = ?",
        params![id.0],
        |row| row.get(0),
      )
      .optional()?;

    match kind {
      Some(kind) => {
        self
          .tx
          .execute("DELETE FROM records WHERE id = ?", params![id.0])?;
        self.touch(&kind);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn set_local(&mut self, id: RecordId, local: &Map<String, Value>) -> Result<()> {
    let encoded = serde_json::to_string(local)?;
    let kind: Option<String> = self
      .tx
      .query_row(
        "SELECT kind FROM records WHERE id = ?",
        params![id.0],
        |row| row.get(0),
      )
      .optional()?;

    if let Some(kind) = kind {
      self.tx.execute(
        "UPDATE records SET local = ? WHERE id = ?",
        params![encoded, id.0],
      )?;
      self.touch(&kind);
    }
    Ok(())
  }
}

/// Column values as read from SQLite, before JSON decoding.
struct RowParts {
  id: i64,
  kind: String,
  key: String,
  parent: Option<String>,
  position: i64,
  rank: i64,
  derived_from: Option<String>,
  data: String,
  local: String,
  updated_at: String,
}

impl RowParts {
  fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      kind: row.get(1)?,
      key: row.get(2)?,
      parent: row.get(3)?,
      position: row.get(4)?,
      rank: row.get(5)?,
      derived_from: row.get(6)?,
      data: row.get(7)?,
      local: row.get(8)?,
      updated_at: row.get(9)?,
    })
  }

  fn into_record(self) -> Result<RawRecord> {
    Ok(RawRecord {
      id: RecordId(self.id),
      kind: self.kind,
      key: self.key,
      parent: self.parent,
      position: self.position,
      rank: self.rank,
      derived_from: self.derived_from,
      data: serde_json::from_str(&self.data)?,
      local: serde_json::from_str(&self.local)?,
      updated_at: parse_datetime(&self.updated_at)?,
    })
  }
}

fn find_record(conn: &Connection, kind: &str, key: &str) -> Result<Option<RawRecord>> {
  let sql = format!(
    "SELECT {} FROM records WHERE kind = ? AND natural_key = ?",
    RECORD_COLUMNS
  );
  conn
    .query_row(&sql, params![kind, key], RowParts::from_row)
    .optional()?
    .map(RowParts::into_record)
    .transpose()
}

fn query_scope(conn: &Connection, scope: &Scope) -> Result<Vec<RawRecord>> {
  let sql = format!(
    "SELECT {} FROM records WHERE kind = ?1 AND (?2 IS NULL OR parent_key = ?2)",
    RECORD_COLUMNS
  );
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt.query_map(params![scope.kind(), scope.parent()], RowParts::from_row)?;
  let records = rows
    .map(|parts| parts.map_err(SyncError::from).and_then(RowParts::into_record))
    .collect::<Result<Vec<_>>>()?;

  Ok(scope.apply(records))
}

/// Parse an RFC 3339 timestamp written by this store.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| SyncError::Corrupt(format!("failed to parse datetime '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn fields(key: &str, parent: &str, position: i64, data: Value) -> RecordFields {
    RecordFields {
      kind: "note".to_string(),
      key: key.to_string(),
      parent: Some(parent.to_string()),
      position,
      rank: 0,
      derived_from: None,
      data,
    }
  }

  #[derive(Clone, serde::Serialize, serde::Deserialize)]
  struct Note {
    title: String,
  }

  impl Entity for Note {
    fn kind() -> &'static str {
      "note"
    }

    fn natural_key(&self) -> String {
      self.title.clone()
    }
  }

  #[test]
  fn test_upsert_reuses_identity_and_keeps_local_fields() {
    let store = Store::open_in_memory().unwrap();

    let first = store
      .write(|tx| tx.upsert(&fields("a", "p", 0, json!({"title": "a"}))))
      .unwrap();
    assert!(matches!(first, Upsert::Inserted(_)));

    store
      .write(|tx| {
        let mut local = Map::new();
        local.insert("downloading".to_string(), json!(true));
        tx.set_local(first.id(), &local)
      })
      .unwrap();

    let second = store
      .write(|tx| tx.upsert(&fields("a", "p", 3, json!({"title": "a2"}))))
      .unwrap();
    assert_eq!(second, Upsert::Updated(first.id()));

    let rows = store.fetch(&Scope::children_of::<Note>("p")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, first.id());
    assert_eq!(rows[0].position, 3);
    assert_eq!(rows[0].data, json!({"title": "a2"}));
    assert_eq!(rows[0].local.get("downloading"), Some(&json!(true)));
  }

  #[test]
  fn test_unchanged_upsert_does_not_write() {
    let store = Store::open_in_memory().unwrap();
    store
      .write(|tx| tx.upsert(&fields("a", "p", 0, json!({"title": "a"}))))
      .unwrap();
    let version = store.version();

    let again = store
      .write(|tx| tx.upsert(&fields("a", "p", 0, json!({"title": "a"}))))
      .unwrap();
    assert!(matches!(again, Upsert::Unchanged(_)));
    assert_eq!(store.version(), version);
  }

  #[test]
  fn test_failed_unit_of_work_rolls_back() {
    let store = Store::open_in_memory().unwrap();

    let result: Result<()> = store.write(|tx| {
      tx.insert(&fields("a", "p", 0, json!({"title": "a"})))?;
      tx.stamp_refresh("notes-p", Utc::now())?;
      Err(SyncError::Corrupt("boom".to_string()))
    });
    assert!(result.is_err());

    assert!(store
      .fetch(&Scope::children_of::<Note>("p"))
      .unwrap()
      .is_empty());
    assert!(store.last_refresh("notes-p").unwrap().is_none());
    assert_eq!(store.version(), 0);
  }

  #[test]
  fn test_commit_event_names_touched_kinds() {
    let store = Store::open_in_memory().unwrap();
    let mut commits = store.subscribe_commits();

    store
      .write(|tx| tx.insert(&fields("a", "p", 0, json!({"title": "a"}))))
      .unwrap();
    // TTL-only commits do not notify
    store
      .write(|tx| tx.stamp_refresh("notes-p", Utc::now()))
      .unwrap();

    let event = commits.try_recv().unwrap();
    assert_eq!(event.version, 1);
    assert!(event.touches("note"));
    assert!(!event.touches("module"));
    assert!(commits.try_recv().is_err());
  }

  #[test]
  fn test_refresh_prefix_clear() {
    let store = Store::open_in_memory().unwrap();
    let now = Utc::now();
    store
      .write(|tx| {
        tx.stamp_refresh("modules-1", now)?;
        tx.stamp_refresh("modules-2", now)?;
        tx.stamp_refresh("module_x-1", now)?;
        tx.stamp_refresh("Modules-3", now)?;
        tx.stamp_refresh("files_%-1", now)?;
        Ok(())
      })
      .unwrap();

    let removed = store
      .write(|tx| tx.clear_refresh_prefix("modules-"))
      .unwrap();
    assert_eq!(removed, 2);
    assert!(store.last_refresh("modules-1").unwrap().is_none());
    assert!(store.last_refresh("module_x-1").unwrap().is_some());
    assert!(store.last_refresh("Modules-3").unwrap().is_some());

    let removed = store.write(|tx| tx.clear_refresh_prefix("files_%")).unwrap();
    assert_eq!(removed, 1);
    let removed = store.write(|tx| tx.clear_refresh_prefix("module_")).unwrap();
    assert_eq!(removed, 1);
  }

  #[test]
  fn test_stamp_round_trips_timestamp() {
    let store = Store::open_in_memory().unwrap();
    let at = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
      .unwrap()
      .with_timezone(&Utc);
    store.write(|tx| tx.stamp_refresh("k", at)).unwrap();
    assert_eq!(store.last_refresh("k").unwrap(), Some(at));
  }

  #[test]
  fn test_on_disk_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = Store::open(&path).unwrap();
      store
        .write(|tx| tx.insert(&fields("a", "p", 0, json!({"title": "a"}))))
        .unwrap();
    }

    let store = Store::open(&path).unwrap();
    let found = store.find::<Note>("a").unwrap().unwrap();
    assert_eq!(found.data.title, "a");
  }

  #[test]
  fn test_purge_all_touches_every_kind() {
    let store = Store::open_in_memory().unwrap();
    store
      .write(|tx| {
        tx.insert(&fields("a", "p", 0, json!({"title": "a"})))?;
        let mut other = fields("b", "p", 0, json!({}));
        other.kind = "module".to_string();
        tx.insert(&other)?;
        Ok(())
      })
      .unwrap();

    let mut commits = store.subscribe_commits();
    let removed = store.write(|tx| tx.purge_all()).unwrap();
    assert_eq!(removed, 2);

    let event = commits.try_recv().unwrap();
    assert!(event.touches("note"));
    assert!(event.touches("module"));
  }
}
