//! Caching implementations for course types.

use crate::cache::{CacheKey, Derived, Entity};

use super::types::{Module, ModuleItem, ModuleItemContent};

/// Suffix of the synthetic row that follows an unresolved mastery-path gate.
pub const MASTERY_PATH_SUFFIX: &str = "mastery-path";

// ============================================================================
// Natural keys
// ============================================================================

/// Module ids are only unique per course.
pub fn module_key(course_id: &str, module_id: &str) -> String {
  format!("{}/{}", course_id, module_id)
}

/// Item ids are namespaced by course.
pub fn item_key(course_id: &str, item_id: &str) -> String {
  format!("{}/{}", course_id, item_id)
}

// ============================================================================
// Entity implementations
// ============================================================================

impl Entity for Module {
  fn kind() -> &'static str {
    "module"
  }

  fn natural_key(&self) -> String {
    module_key(&self.course_id, &self.id)
  }

  fn parent_key(&self) -> Option<String> {
    Some(self.course_id.clone())
  }

  fn position(&self) -> Option<i64> {
    self.position
  }

  fn validate(&self) -> Result<(), String> {
    if self.id.is_empty() {
      return Err("module without id".to_string());
    }
    Ok(())
  }
}

impl Entity for ModuleItem {
  fn kind() -> &'static str {
    "module_item"
  }

  fn natural_key(&self) -> String {
    item_key(&self.course_id, &self.id)
  }

  fn parent_key(&self) -> Option<String> {
    Some(module_key(&self.course_id, &self.module_id))
  }

  fn position(&self) -> Option<i64> {
    self.position
  }

  fn validate(&self) -> Result<(), String> {
    if self.id.is_empty() {
      return Err("module item without id".to_string());
    }
    if self.module_id.is_empty() {
      return Err("module item without module id".to_string());
    }
    Ok(())
  }

  fn derived(&self) -> Option<Derived<Self>> {
    let paths = self.mastery_paths.as_ref().filter(|p| p.awaits_choice())?;

    let placeholder = ModuleItem {
      id: format!("{}-{}", self.id, MASTERY_PATH_SUFFIX),
      title: self.title.clone(),
      indent: self.indent,
      content: ModuleItemContent::MasteryPath {
        trigger_item_id: self.id.clone(),
        assignment_set_ids: paths.assignment_set_ids.clone(),
      },
      html_url: None,
      completion_requirement: None,
      details: None,
      mastery_paths: None,
      ..self.clone()
    };
    Some(Derived::new(MASTERY_PATH_SUFFIX, placeholder))
  }
}

// ============================================================================
// Cache keys
// ============================================================================

/// `modules-<courseID>`: every module of a course with their items.
pub fn modules_cache_key(course_id: &str) -> CacheKey {
  CacheKey::new("modules").part(course_id)
}

/// `module-item-<courseID>-<moduleID>-<itemID>`: one item.
pub fn module_item_cache_key(course_id: &str, module_id: &str, item_id: &str) -> CacheKey {
  CacheKey::new("module-item")
    .part(course_id)
    .part(module_id)
    .part(item_id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lms::types::MasteryPaths;

  fn item(paths: Option<MasteryPaths>) -> ModuleItem {
    ModuleItem {
      course_id: "12".to_string(),
      module_id: "4".to_string(),
      id: "77".to_string(),
      title: "Checkpoint".to_string(),
      position: Some(3),
      indent: 1,
      content: ModuleItemContent::Assignment {
        id: "8".to_string(),
      },
      html_url: None,
      published: true,
      completion_requirement: None,
      details: None,
      mastery_paths: paths,
    }
  }

  fn paths(locked: bool, selected: Option<&str>) -> MasteryPaths {
    MasteryPaths {
      locked,
      assignment_set_ids: vec!["1".to_string(), "2".to_string()],
      selected_set_id: selected.map(String::from),
    }
  }

  #[test]
  fn test_item_keys_are_namespaced() {
    let item = item(None);
    assert_eq!(item.natural_key(), "12/77");
    assert_eq!(item.parent_key().as_deref(), Some("12/4"));
  }

  #[test]
  fn test_derived_only_while_choice_is_pending() {
    assert!(item(None).derived().is_none());
    assert!(item(Some(paths(true, None))).derived().is_none());
    assert!(item(Some(paths(false, Some("1")))).derived().is_none());

    let derived = item(Some(paths(false, None))).derived().unwrap();
    assert_eq!(derived.key_for("12/77"), "12/77-mastery-path");
    assert!(matches!(
      derived.record.content,
      ModuleItemContent::MasteryPath { ref trigger_item_id, .. } if trigger_item_id == "77"
    ));
    assert!(derived.record.mastery_paths.is_none());
  }

  #[test]
  fn test_cache_keys() {
    assert_eq!(modules_cache_key("12").as_str(), "modules-12");
    assert_eq!(
      module_item_cache_key("12", "4", "77").as_str(),
      "module-item-12-4-77"
    );
  }
}
