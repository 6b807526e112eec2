//! Merge server responses into the local store.
//!
//! Records are matched by natural key and updated in place, so their storage
//! identity and local-only fields survive a refresh. Pruning of records the
//! server no longer lists only happens for exhaustive listings.

use std::collections::HashSet;

use tracing::debug;

use super::scope::Scope;
use super::storage::{RecordFields, RecordId, Repository, Upsert};
use super::traits::Entity;
use crate::error::{Result, SyncError};

/// Whether a response lists the complete current membership of its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
  /// Everything in scope was returned; absent records are deleted.
  Exhaustive,
  /// Only some records were returned; siblings are left alone.
  Partial,
}

/// What a reconciliation changed, by natural key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
  pub inserted: Vec<String>,
  pub updated: Vec<String>,
  pub unchanged: Vec<String>,
  pub deleted: Vec<String>,
  /// Storage ids of the reconciled server records, in response order
  pub ids: Vec<RecordId>,
}

impl ReconcileReport {
  fn note(&mut self, key: String, upsert: Upsert) {
    match upsert {
      Upsert::Inserted(_) => self.inserted.push(key),
      Upsert::Updated(_) => self.updated.push(key),
      Upsert::Unchanged(_) => self.unchanged.push(key),
    }
  }

  pub fn merge(&mut self, other: ReconcileReport) {
    self.inserted.extend(other.inserted);
    self.updated.extend(other.updated);
    self.unchanged.extend(other.unchanged);
    self.deleted.extend(other.deleted);
    self.ids.extend(other.ids);
  }

  /// Whether anything was written.
  pub fn changed(&self) -> bool {
    !(self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
  }
}

/// A parent record together with its children, when the payload included them.
#[derive(Debug, Clone)]
pub struct Node<P, C> {
  pub record: P,
  /// `None` when the server omitted the children; cached ones are kept.
  pub children: Option<Vec<C>>,
}

impl<P, C> Node<P, C> {
  pub fn new(record: P, children: Option<Vec<C>>) -> Self {
    Self { record, children }
  }
}

/// Reconcile `records` into `scope`.
///
/// Must run inside one unit of work so the batch commits or rolls back as a whole.
pub fn reconcile<T, R>(
  repo: &mut R,
  records: &[T],
  scope: &Scope,
  listing: Listing,
) -> Result<ReconcileReport>
where
  T: Entity,
  R: Repository + ?Sized,
{
  let (mut report, seen) = upsert_all(repo, records.iter(), listing)?;
  if listing == Listing::Exhaustive {
    report.deleted.extend(prune(repo, scope, &seen)?);
  }

  debug!(
    kind = T::kind(),
    ?listing,
    inserted = report.inserted.len(),
    updated = report.updated.len(),
    deleted = report.deleted.len(),
    "reconciled"
  );
  Ok(report)
}

/// Reconcile parents, then each parent's children.
///
/// Children of a parent are always treated as that parent's full ordered list.
/// All upserts happen before any pruning, so a child that moved between two
/// parents in the same response keeps its identity.
pub fn reconcile_tree<P, C, R>(
  repo: &mut R,
  nodes: &[Node<P, C>],
  scope: &Scope,
  listing: Listing,
) -> Result<ReconcileReport>
where
  P: Entity,
  C: Entity,
  R: Repository + ?Sized,
{
  let (mut report, seen) = upsert_all(repo, nodes.iter().map(|n| &n.record), listing)?;

  let mut child_passes = Vec::new();
  for node in nodes {
    let Some(children) = &node.children else {
      continue;
    };
    let parent_key = node.record.natural_key();
    for child in children {
      if child.parent_key().as_deref() != Some(parent_key.as_str()) {
        return Err(SyncError::InvalidRecord {
          kind: C::kind(),
          key: child.natural_key(),
          reason: format!("listed under {} but owned by {:?}", parent_key, child.parent_key()),
        });
      }
    }
    let (child_report, child_seen) = upsert_all(repo, children.iter(), Listing::Exhaustive)?;
    report.merge(child_report);
    child_passes.push((parent_key, child_seen));
  }

  for (parent_key, child_seen) in &child_passes {
    let child_scope = Scope::children_of::<C>(parent_key);
    report.deleted.extend(prune(repo, &child_scope, child_seen)?);
  }

  if listing == Listing::Exhaustive {
    let removed = prune(repo, scope, &seen)?;
    for parent_key in &removed {
      // Orphaned children go with their parent
      for row in repo.fetch(&Scope::children_of::<C>(parent_key))? {
        repo.delete(row.id)?;
        report.deleted.push(row.key);
      }
    }
    report.deleted.extend(removed);
  }

  debug!(
    parent = P::kind(),
    child = C::kind(),
    ?listing,
    inserted = report.inserted.len(),
    updated = report.updated.len(),
    deleted = report.deleted.len(),
    "reconciled tree"
  );
  Ok(report)
}

/// Upsert every record (and its synthetic sibling). Returns the keys written.
fn upsert_all<'a, T, R>(
  repo: &mut R,
  records: impl IntoIterator<Item = &'a T>,
  listing: Listing,
) -> Result<(ReconcileReport, HashSet<String>)>
where
  T: Entity,
  R: Repository + ?Sized,
{
  let mut report = ReconcileReport::default();
  let mut seen = HashSet::new();

  for (index, record) in records.into_iter().enumerate() {
    let key = record.natural_key();
    if key.is_empty() {
      return Err(SyncError::InvalidRecord {
        kind: T::kind(),
        key,
        reason: "empty natural key".to_string(),
      });
    }
    record
      .validate()
      .map_err(|reason| SyncError::InvalidRecord {
        kind: T::kind(),
        key: key.clone(),
        reason,
      })?;

    let existing = repo.find(T::kind(), &key)?;
    let position = match (record.position(), listing) {
      (Some(position), _) => position,
      // A full listing rebuilds the order from scratch
      (None, Listing::Exhaustive) => index as i64,
      (None, Listing::Partial) => existing
        .as_ref()
        .map(|row| row.position)
        .unwrap_or(index as i64),
    };

    let fields = RecordFields {
      kind: T::kind().to_string(),
      key: key.clone(),
      parent: record.parent_key(),
      position,
      rank: 0,
      derived_from: None,
      data: serde_json::to_value(record)?,
    };

    let upsert = match existing {
      Some(row) if row.same_fields(&fields) => Upsert::Unchanged(row.id),
      Some(row) => {
        repo.update(row.id, &fields)?;
        Upsert::Updated(row.id)
      }
      None => Upsert::Inserted(repo.insert(&fields)?),
    };
    report.ids.push(upsert.id());
    report.note(key.clone(), upsert);

    sync_derived(repo, record, &fields, &mut seen, &mut report)?;
    seen.insert(key);
  }

  Ok((report, seen))
}

/// Keep exactly one synthetic sibling while the trigger asks for it, none otherwise.
fn sync_derived<T, R>(
  repo: &mut R,
  record: &T,
  trigger: &RecordFields,
  seen: &mut HashSet<String>,
  report: &mut ReconcileReport,
) -> Result<()>
where
  T: Entity,
  R: Repository + ?Sized,
{
  let existing = repo.derived_of(T::kind(), &trigger.key)?;

  let Some(derived) = record.derived() else {
    for row in existing {
      repo.delete(row.id)?;
      report.deleted.push(row.key);
    }
    return Ok(());
  };

  let key = derived.key_for(&trigger.key);
  for stale in existing.into_iter().filter(|row| row.key != key) {
    repo.delete(stale.id)?;
    report.deleted.push(stale.key);
  }

  let fields = RecordFields {
    kind: T::kind().to_string(),
    key: key.clone(),
    parent: trigger.parent.clone(),
    position: trigger.position,
    rank: 1,
    derived_from: Some(trigger.key.clone()),
    data: serde_json::to_value(&derived.record)?,
  };
  let upsert = repo.upsert(&fields)?;
  report.note(key.clone(), upsert);
  seen.insert(key);
  Ok(())
}

/// Delete rows in `scope` whose key was not seen. Returns the deleted keys.
fn prune<R>(repo: &mut R, scope: &Scope, seen: &HashSet<String>) -> Result<Vec<String>>
where
  R: Repository + ?Sized,
{
  let mut deleted = Vec::new();
  for row in repo.fetch(scope)? {
    if !seen.contains(&row.key) {
      repo.delete(row.id)?;
      deleted.push(row.key);
    }
  }
  Ok(deleted)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{RawRecord, Store};
  use crate::cache::traits::Derived;
  use serde::{Deserialize, Serialize};
  use serde_json::{json, Map};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Section {
    id: String,
    name: String,
  }

  impl Entity for Section {
    fn kind() -> &'static str {
      "section"
    }

    fn natural_key(&self) -> String {
      self.id.clone()
    }

    fn parent_key(&self) -> Option<String> {
      Some("course".to_string())
    }
  }

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Step {
    id: String,
    section: String,
    title: String,
    position: Option<i64>,
    #[serde(default)]
    gated: bool,
  }

  impl Entity for Step {
    fn kind() -> &'static str {
      "step"
    }

    fn natural_key(&self) -> String {
      self.id.clone()
    }

    fn parent_key(&self) -> Option<String> {
      Some(self.section.clone())
    }

    fn position(&self) -> Option<i64> {
      self.position
    }

    fn validate(&self) -> Result<(), String> {
      if self.title.is_empty() {
        return Err("missing title".to_string());
      }
      Ok(())
    }

    fn derived(&self) -> Option<Derived<Self>> {
      self.gated.then(|| {
        Derived::new(
          "choose",
          Step {
            id: format!("{}-choose", self.id),
            section: self.section.clone(),
            title: "Choose a path".to_string(),
            position: self.position,
            gated: false,
          },
        )
      })
    }
  }

  fn step(id: &str, section: &str, position: i64) -> Step {
    Step {
      id: id.to_string(),
      section: section.to_string(),
      title: format!("Step {}", id),
      position: Some(position),
      gated: false,
    }
  }

  fn steps_in(store: &Store, section: &str) -> Vec<RawRecord> {
    store.fetch(&Scope::children_of::<Step>(section)).unwrap()
  }

  fn keys(rows: &[RawRecord]) -> Vec<&str> {
    rows.iter().map(|r| r.key.as_str()).collect()
  }

  #[test]
  fn test_reconcile_twice_is_idempotent() {
    let store = Store::open_in_memory().unwrap();
    let scope = Scope::children_of::<Step>("s1");
    let response = vec![step("a", "s1", 1), step("b", "s1", 2)];

    store
      .write(|tx| reconcile(tx, &response, &scope, Listing::Exhaustive))
      .unwrap();
    let first = steps_in(&store, "s1");

    let report = store
      .write(|tx| reconcile(tx, &response, &scope, Listing::Exhaustive))
      .unwrap();
    let second = steps_in(&store, "s1");

    assert_eq!(first, second);
    assert!(!report.changed());
    assert_eq!(report.unchanged, vec!["a", "b"]);
  }

  #[test]
  fn test_matching_key_updates_in_place() {
    let store = Store::open_in_memory().unwrap();
    let scope = Scope::children_of::<Step>("s1");

    store
      .write(|tx| reconcile(tx, &[step("a", "s1", 1)], &scope, Listing::Exhaustive))
      .unwrap();
    let before = steps_in(&store, "s1");

    let mut renamed = step("a", "s1", 1);
    renamed.title = "Renamed".to_string();
    let report = store
      .write(|tx| reconcile(tx, &[renamed], &scope, Listing::Exhaustive))
      .unwrap();
    let after = steps_in(&store, "s1");

    assert_eq!(report.updated, vec!["a"]);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, before[0].id);
    assert_eq!(after[0].data["title"], json!("Renamed"));
  }

  #[test]
  fn test_local_fields_survive_reconciliation() {
    let store = Store::open_in_memory().unwrap();
    let scope = Scope::children_of::<Step>("s1");
    store
      .write(|tx| reconcile(tx, &[step("a", "s1", 1)], &scope, Listing::Exhaustive))
      .unwrap();

    let id = steps_in(&store, "s1")[0].id;
    store
      .write(|tx| {
        let mut local = Map::new();
        local.insert("in_progress".to_string(), json!(true));
        tx.set_local(id, &local)
      })
      .unwrap();

    let mut changed = step("a", "s1", 4);
    changed.title = "New".to_string();
    store
      .write(|tx| reconcile(tx, &[changed], &scope, Listing::Exhaustive))
      .unwrap();

    let row = &steps_in(&store, "s1")[0];
    assert_eq!(row.local.get("in_progress"), Some(&json!(true)));
    assert_eq!(row.position, 4);
  }

  #[test]
  fn test_exhaustive_listing_prunes_missing() {
    let store = Store::open_in_memory().unwrap();
    let scope = Scope::children_of::<Step>("s1");
    let all = vec![step("a", "s1", 1), step("b", "s1", 2), step("c", "s1", 3)];
    store
      .write(|tx| reconcile(tx, &all, &scope, Listing::Exhaustive))
      .unwrap();

    let report = store
      .write(|tx| {
        reconcile(
          tx,
          &[step("a", "s1", 1), step("c", "s1", 3)],
          &scope,
          Listing::Exhaustive,
        )
      })
      .unwrap();

    assert_eq!(report.deleted, vec!["b"]);
    assert_eq!(keys(&steps_in(&store, "s1")), vec!["a", "c"]);
  }

  #[test]
  fn test_partial_response_keeps_siblings() {
    let store = Store::open_in_memory().unwrap();
    let scope = Scope::children_of::<Step>("s1");
    let all = vec![step("a", "s1", 1), step("b", "s1", 2), step("c", "s1", 3)];
    store
      .write(|tx| reconcile(tx, &all, &scope, Listing::Exhaustive))
      .unwrap();

    let mut a = step("a", "s1", 1);
    a.title = "Updated".to_string();
    let report = store
      .write(|tx| reconcile(tx, &[a], &scope, Listing::Partial))
      .unwrap();

    assert!(report.deleted.is_empty());
    let rows = steps_in(&store, "s1");
    assert_eq!(keys(&rows), vec!["a", "b", "c"]);
    assert_eq!(rows[0].data["title"], json!("Updated"));
    assert_eq!(rows[1].data["title"], json!("Step b"));
  }

  #[test]
  fn test_partial_without_position_keeps_cached_position() {
    let store = Store::open_in_memory().unwrap();
    let scope = Scope::children_of::<Step>("s1");
    store
      .write(|tx| {
        reconcile(
          tx,
          &[step("a", "s1", 1), step("b", "s1", 7)],
          &scope,
          Listing::Exhaustive,
        )
      })
      .unwrap();

    let mut b = step("b", "s1", 0);
    b.position = None;
    store
      .write(|tx| reconcile(tx, &[b], &scope, Listing::Partial))
      .unwrap();

    let rows = steps_in(&store, "s1");
    assert_eq!(rows[1].key, "b");
    assert_eq!(rows[1].position, 7);
  }

  #[test]
  fn test_exhaustive_without_positions_uses_response_order() {
    let store = Store::open_in_memory().unwrap();
    let scope = Scope::children_of::<Step>("s1");
    let mut response = vec![step("z", "s1", 0), step("m", "s1", 0), step("a", "s1", 0)];
    for s in &mut response {
      s.position = None;
    }

    store
      .write(|tx| reconcile(tx, &response, &scope, Listing::Exhaustive))
      .unwrap();
    assert_eq!(keys(&steps_in(&store, "s1")), vec!["z", "m", "a"]);

    response.reverse();
    store
      .write(|tx| reconcile(tx, &response, &scope, Listing::Exhaustive))
      .unwrap();
    assert_eq!(keys(&steps_in(&store, "s1")), vec!["a", "m", "z"]);
  }

  #[test]
  fn test_synthetic_child_lifecycle() {
    let store = Store::open_in_memory().unwrap();
    let scope = Scope::children_of::<Step>("s1");

    let mut gated = step("b", "s1", 2);
    gated.gated = true;
    let response = vec![step("a", "s1", 1), gated.clone(), step("c", "s1", 3)];

    store
      .write(|tx| reconcile(tx, &response, &scope, Listing::Exhaustive))
      .unwrap();
    // A second pass must not duplicate the synthetic row
    store
      .write(|tx| reconcile(tx, &response, &scope, Listing::Exhaustive))
      .unwrap();

    let rows = steps_in(&store, "s1");
    assert_eq!(keys(&rows), vec!["a", "b", "b-choose", "c"]);
    assert_eq!(rows[2].derived_from.as_deref(), Some("b"));
    assert_eq!(rows[2].rank, 1);

    gated.gated = false;
    let report = store
      .write(|tx| {
        reconcile(
          tx,
          &[step("a", "s1", 1), gated, step("c", "s1", 3)],
          &scope,
          Listing::Exhaustive,
        )
      })
      .unwrap();

    assert_eq!(report.deleted, vec!["b-choose"]);
    assert_eq!(keys(&steps_in(&store, "s1")), vec!["a", "b", "c"]);
  }

  #[test]
  fn test_synthetic_child_resolved_by_partial_update() {
    let store = Store::open_in_memory().unwrap();
    let scope = Scope::children_of::<Step>("s1");
    let mut gated = step("b", "s1", 2);
    gated.gated = true;
    store
      .write(|tx| {
        reconcile(
          tx,
          &[step("a", "s1", 1), gated.clone()],
          &scope,
          Listing::Exhaustive,
        )
      })
      .unwrap();

    gated.gated = false;
    store
      .write(|tx| reconcile(tx, &[gated], &scope, Listing::Partial))
      .unwrap();

    assert_eq!(keys(&steps_in(&store, "s1")), vec!["a", "b"]);
  }

  #[test]
  fn test_invalid_record_rolls_back_whole_batch() {
    let store = Store::open_in_memory().unwrap();
    let scope = Scope::children_of::<Step>("s1");
    store
      .write(|tx| reconcile(tx, &[step("a", "s1", 1)], &scope, Listing::Exhaustive))
      .unwrap();

    let mut broken = step("c", "s1", 3);
    broken.title.clear();
    let err = store
      .write(|tx| {
        reconcile(
          tx,
          &[step("b", "s1", 2), broken],
          &scope,
          Listing::Exhaustive,
        )
      })
      .unwrap_err();

    match err {
      SyncError::InvalidRecord { kind, key, .. } => {
        assert_eq!(kind, "step");
        assert_eq!(key, "c");
      }
      other => panic!("Expected InvalidRecord, got {:?}", other),
    }
    assert_eq!(keys(&steps_in(&store, "s1")), vec!["a"]);
  }

  #[test]
  fn test_tree_reconcile_prunes_children_and_orphans() {
    let store = Store::open_in_memory().unwrap();
    let sections = Scope::children_of::<Section>("course");
    let section = |id: &str| Section {
      id: id.to_string(),
      name: id.to_uppercase(),
    };

    let nodes = vec![
      Node::new(
        section("s1"),
        Some(vec![step("a", "s1", 1), step("b", "s1", 2)]),
      ),
      Node::new(section("s2"), Some(vec![step("c", "s2", 1)])),
    ];
    store
      .write(|tx| reconcile_tree(tx, &nodes, &sections, Listing::Exhaustive))
      .unwrap();
    assert_eq!(keys(&steps_in(&store, "s1")), vec!["a", "b"]);

    let nodes = vec![Node::new(section("s1"), Some(vec![step("b", "s1", 1)]))];
    let report = store
      .write(|tx| reconcile_tree(tx, &nodes, &sections, Listing::Exhaustive))
      .unwrap();

    assert_eq!(keys(&steps_in(&store, "s1")), vec!["b"]);
    assert!(steps_in(&store, "s2").is_empty());
    assert_eq!(keys(&store.fetch(&sections).unwrap()), vec!["s1"]);
    assert!(report.deleted.contains(&"a".to_string()));
    assert!(report.deleted.contains(&"c".to_string()));
    assert!(report.deleted.contains(&"s2".to_string()));
  }

  #[test]
  fn test_tree_without_children_keeps_cached_children() {
    let store = Store::open_in_memory().unwrap();
    let sections = Scope::children_of::<Section>("course");
    let s1 = Section {
      id: "s1".to_string(),
      name: "One".to_string(),
    };

    store
      .write(|tx| {
        reconcile_tree(
          tx,
          &[Node::new(s1.clone(), Some(vec![step("a", "s1", 1)]))],
          &sections,
          Listing::Exhaustive,
        )
      })
      .unwrap();
    store
      .write(|tx| {
        reconcile_tree::<_, Step, _>(tx, &[Node::new(s1, None)], &sections, Listing::Exhaustive)
      })
      .unwrap();

    assert_eq!(keys(&steps_in(&store, "s1")), vec!["a"]);
  }

  #[test]
  fn test_child_moving_between_parents_keeps_identity() {
    let store = Store::open_in_memory().unwrap();
    let sections = Scope::children_of::<Section>("course");
    let section = |id: &str| Section {
      id: id.to_string(),
      name: id.to_string(),
    };

    store
      .write(|tx| {
        reconcile_tree(
          tx,
          &[
            Node::new(section("s1"), Some(vec![step("a", "s1", 1)])),
            Node::new(section("s2"), Some(vec![])),
          ],
          &sections,
          Listing::Exhaustive,
        )
      })
      .unwrap();
    let before = steps_in(&store, "s1")[0].id;

    store
      .write(|tx| {
        reconcile_tree(
          tx,
          &[
            Node::new(section("s1"), Some(vec![])),
            Node::new(section("s2"), Some(vec![step("a", "s2", 1)])),
          ],
          &sections,
          Listing::Exhaustive,
        )
      })
      .unwrap();

    assert!(steps_in(&store, "s1").is_empty());
    assert_eq!(steps_in(&store, "s2")[0].id, before);
  }

  #[test]
  fn test_child_with_foreign_parent_is_rejected() {
    let store = Store::open_in_memory().unwrap();
    let sections = Scope::children_of::<Section>("course");
    let s1 = Section {
      id: "s1".to_string(),
      name: "One".to_string(),
    };

    let err = store
      .write(|tx| {
        reconcile_tree(
          tx,
          &[Node::new(s1, Some(vec![step("a", "s9", 1)]))],
          &sections,
          Listing::Exhaustive,
        )
      })
      .unwrap_err();

    assert!(matches!(err, SyncError::InvalidRecord { .. }));
    assert!(store.fetch(&sections).unwrap().is_empty());
  }
}
