//! Scopes select and order the cached records that belong to one cache key.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde_json::Value;

use super::storage::RawRecord;
use super::traits::Entity;

/// Filter over stored records of a single kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
  All,
  /// Records owned by the given parent key
  ParentEquals(String),
  KeyIn(BTreeSet<String>),
  /// Top-level field of the stored payload equals `value`
  FieldEquals { field: String, value: Value },
  And(Vec<Predicate>),
}

impl Predicate {
  pub fn matches(&self, record: &RawRecord) -> bool {
    match self {
      Predicate::All => true,
      Predicate::ParentEquals(parent) => record.parent.as_deref() == Some(parent.as_str()),
      Predicate::KeyIn(keys) => keys.contains(&record.key),
      Predicate::FieldEquals { field, value } => record.data.get(field) == Some(value),
      Predicate::And(all) => all.iter().all(|p| p.matches(record)),
    }
  }

  /// Parent constraint implied by this predicate, used to narrow the SQL query.
  fn parent(&self) -> Option<&str> {
    match self {
      Predicate::ParentEquals(parent) => Some(parent),
      Predicate::And(all) => all.iter().find_map(Predicate::parent),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Asc,
  Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortField {
  /// Server position, then synthetic rank
  Position,
  Key,
  /// Top-level field of the stored payload
  Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
  pub field: SortField,
  pub direction: Direction,
}

/// Predicate plus ordering for one kind of record.
///
/// The order is always total: the natural key breaks any remaining ties.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
  kind: &'static str,
  predicate: Predicate,
  order: Vec<SortKey>,
}

impl Scope {
  /// Every record of kind `T`, ordered by key.
  pub fn of<T: Entity>() -> Self {
    Self {
      kind: T::kind(),
      predicate: Predicate::All,
      order: Vec::new(),
    }
  }

  /// Children of `parent`, in server order.
  pub fn children_of<T: Entity>(parent: &str) -> Self {
    Self {
      kind: T::kind(),
      predicate: Predicate::ParentEquals(parent.to_string()),
      order: vec![SortKey {
        field: SortField::Position,
        direction: Direction::Asc,
      }],
    }
  }

  /// Narrow the scope with an additional predicate.
  pub fn filter(mut self, predicate: Predicate) -> Self {
    self.predicate = match self.predicate {
      Predicate::All => predicate,
      Predicate::And(mut all) => {
        all.push(predicate);
        Predicate::And(all)
      }
      existing => Predicate::And(vec![existing, predicate]),
    };
    self
  }

  pub fn order_by(mut self, field: SortField, direction: Direction) -> Self {
    self.order.push(SortKey { field, direction });
    self
  }

  pub fn kind(&self) -> &'static str {
    self.kind
  }

  pub fn predicate(&self) -> &Predicate {
    &self.predicate
  }

  pub fn parent(&self) -> Option<&str> {
    self.predicate.parent()
  }

  pub fn matches(&self, record: &RawRecord) -> bool {
    record.kind == self.kind && self.predicate.matches(record)
  }

  pub fn compare(&self, a: &RawRecord, b: &RawRecord) -> Ordering {
    for key in &self.order {
      let ordering = match &key.field {
        SortField::Position => (a.position, a.rank).cmp(&(b.position, b.rank)),
        SortField::Key => a.key.cmp(&b.key),
        SortField::Field(field) => compare_values(a.data.get(field), b.data.get(field)),
      };
      let ordering = match key.direction {
        Direction::Asc => ordering,
        Direction::Desc => ordering.reverse(),
      };
      if ordering != Ordering::Equal {
        return ordering;
      }
    }
    a.key.cmp(&b.key)
  }

  /// Keep matching records and put them in scope order.
  pub fn apply(&self, records: Vec<RawRecord>) -> Vec<RawRecord> {
    let mut matching: Vec<RawRecord> = records.into_iter().filter(|r| self.matches(r)).collect();
    matching.sort_by(|a, b| self.compare(a, b));
    matching
  }
}

/// Order JSON values: missing first, then null, bools, numbers, strings, the rest.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
  fn class(value: Option<&Value>) -> u8 {
    match value {
      None => 0,
      Some(Value::Null) => 1,
      Some(Value::Bool(_)) => 2,
      Some(Value::Number(_)) => 3,
      Some(Value::String(_)) => 4,
      Some(_) => 5,
    }
  }

  match (a, b) {
    (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
    (Some(Value::Number(x)), Some(Value::Number(y))) => {
      let x = x.as_f64().unwrap_or(f64::NAN);
      let y = y.as_f64().unwrap_or(f64::NAN);
      x.total_cmp(&y)
    }
    (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
    (Some(x), Some(y)) if class(a) == 5 && class(b) == 5 => x.to_string().cmp(&y.to_string()),
    _ => class(a).cmp(&class(b)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{RawRecord, RecordId};
  use chrono::Utc;
  use serde_json::{json, Map};

  fn row(key: &str, parent: Option<&str>, position: i64, rank: i64, data: Value) -> RawRecord {
    RawRecord {
      id: RecordId(0),
      kind: "note".to_string(),
      key: key.to_string(),
      parent: parent.map(String::from),
      position,
      rank,
      derived_from: None,
      data,
      local: Map::new(),
      updated_at: Utc::now(),
    }
  }

  #[derive(Clone, serde::Serialize, serde::Deserialize)]
  struct Note;

  impl Entity for Note {
    fn kind() -> &'static str {
      "note"
    }

    fn natural_key(&self) -> String {
      String::new()
    }
  }

  #[test]
  fn test_children_scope_filters_by_parent() {
    let scope = Scope::children_of::<Note>("m1");
    let rows = vec![
      row("a", Some("m1"), 1, 0, json!({})),
      row("b", Some("m2"), 0, 0, json!({})),
      row("c", None, 0, 0, json!({})),
    ];

    let keys: Vec<String> = scope.apply(rows).into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec!["a"]);
    assert_eq!(scope.parent(), Some("m1"));
  }

  #[test]
  fn test_position_ties_break_on_rank_then_key() {
    let scope = Scope::children_of::<Note>("m1");
    let rows = vec![
      row("z", Some("m1"), 2, 0, json!({})),
      row("b", Some("m1"), 1, 0, json!({})),
      row("b-derived", Some("m1"), 1, 1, json!({})),
      row("a", Some("m1"), 1, 0, json!({})),
    ];

    let keys: Vec<String> = scope.apply(rows).into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec!["a", "b", "b-derived", "z"]);
  }

  #[test]
  fn test_field_order_and_filter() {
    let scope = Scope::of::<Note>()
      .filter(Predicate::FieldEquals {
        field: "published".to_string(),
        value: json!(true),
      })
      .order_by(SortField::Field("name".to_string()), Direction::Desc);
    let rows = vec![
      row("1", None, 0, 0, json!({"name": "alpha", "published": true})),
      row("2", None, 0, 0, json!({"name": "gamma", "published": true})),
      row("3", None, 0, 0, json!({"name": "beta", "published": false})),
    ];

    let keys: Vec<String> = scope.apply(rows).into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec!["2", "1"]);
    assert_eq!(scope.parent(), None);
  }

  #[test]
  fn test_filter_keeps_parent_pushdown() {
    let keys: BTreeSet<String> = ["a".to_string()].into_iter().collect();
    let scope = Scope::children_of::<Note>("m1").filter(Predicate::KeyIn(keys));
    assert_eq!(scope.parent(), Some("m1"));
    assert!(scope.matches(&row("a", Some("m1"), 0, 0, json!({}))));
    assert!(!scope.matches(&row("a", Some("m2"), 0, 0, json!({}))));
  }

  #[test]
  fn test_missing_values_sort_first() {
    assert_eq!(compare_values(None, Some(&json!(1))), Ordering::Less);
    assert_eq!(compare_values(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
    assert_eq!(
      compare_values(Some(&json!("b")), Some(&json!("a"))),
      Ordering::Greater
    );
  }
}
