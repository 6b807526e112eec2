//! Serde-deserializable types matching the learning platform's REST responses.
//!
//! These types are separate from domain types so decoding stays strict
//! (required fields are non-optional) while domain types stay focused on
//! what the cache stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use super::types::{
  CompletionKind, CompletionRequirement, ContentDetails, MasteryPaths, Module, ModuleItem,
  ModuleItemContent, ModuleState,
};

// ============================================================================
// Identifier helpers
// ============================================================================

/// Ids arrive as numbers from most endpoints and as strings from some.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
  Number(i64),
  Text(String),
}

impl From<RawId> for String {
  fn from(id: RawId) -> Self {
    match id {
      RawId::Number(n) => n.to_string(),
      RawId::Text(s) => s,
    }
  }
}

fn id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
  RawId::deserialize(deserializer).map(String::from)
}

fn optional_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
  Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

fn id_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
  Ok(
    Option::<Vec<RawId>>::deserialize(deserializer)?
      .unwrap_or_default()
      .into_iter()
      .map(String::from)
      .collect(),
  )
}

// ============================================================================
// Modules endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiModule {
  #[serde(deserialize_with = "id")]
  pub id: String,
  pub name: String,
  pub position: Option<i64>,
  pub published: Option<bool>,
  pub state: Option<String>,
  pub unlock_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub require_sequential_progress: bool,
  #[serde(default, deserialize_with = "id_list")]
  pub prerequisite_module_ids: Vec<String>,
  #[serde(default)]
  pub items_count: u32,
  /// Present when the listing was requested with `include[]=items` and the
  /// module is small enough for the server to inline them.
  pub items: Option<Vec<ApiModuleItem>>,
}

impl ApiModule {
  pub fn into_domain(self, course_id: &str) -> (Module, Option<Vec<ModuleItem>>) {
    let items = self.items.map(|items| {
      items
        .into_iter()
        .map(|item| item.into_domain(course_id))
        .collect()
    });

    let module = Module {
      course_id: course_id.to_string(),
      id: self.id,
      name: self.name,
      position: self.position,
      published: self.published.unwrap_or(true),
      state: self.state.as_deref().map(ModuleState::parse),
      unlock_at: self.unlock_at,
      require_sequential_progress: self.require_sequential_progress,
      prerequisite_module_ids: self.prerequisite_module_ids,
      items_count: self.items_count,
    };

    (module, items)
  }
}

// ============================================================================
// Module items endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCompletionRequirement {
  #[serde(rename = "type")]
  pub kind: String,
  pub min_score: Option<f64>,
  #[serde(default)]
  pub completed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiContentDetails {
  pub points_possible: Option<f64>,
  pub due_at: Option<DateTime<Utc>>,
  pub unlock_at: Option<DateTime<Utc>>,
  pub lock_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub locked_for_user: bool,
  pub lock_explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAssignmentSet {
  #[serde(deserialize_with = "id")]
  pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiMasteryPaths {
  #[serde(default)]
  pub locked: bool,
  #[serde(default)]
  pub assignment_sets: Vec<ApiAssignmentSet>,
  #[serde(default, deserialize_with = "optional_id")]
  pub selected_set_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiModuleItem {
  #[serde(deserialize_with = "id")]
  pub id: String,
  #[serde(deserialize_with = "id")]
  pub module_id: String,
  pub position: Option<i64>,
  pub title: String,
  #[serde(default)]
  pub indent: u32,
  #[serde(rename = "type")]
  pub item_type: String,
  #[serde(default, deserialize_with = "optional_id")]
  pub content_id: Option<String>,
  pub html_url: Option<String>,
  pub page_url: Option<String>,
  pub external_url: Option<String>,
  pub url: Option<String>,
  pub published: Option<bool>,
  pub completion_requirement: Option<ApiCompletionRequirement>,
  pub content_details: Option<ApiContentDetails>,
  pub mastery_paths: Option<ApiMasteryPaths>,
}

impl ApiModuleItem {
  pub fn into_domain(self, course_id: &str) -> ModuleItem {
    let content = match self.item_type.as_str() {
      "File" => ModuleItemContent::File {
        id: self.content_id.unwrap_or_default(),
      },
      "Page" => ModuleItemContent::Page {
        url: self.page_url.unwrap_or_default(),
      },
      "Discussion" => ModuleItemContent::Discussion {
        id: self.content_id.unwrap_or_default(),
      },
      "Assignment" => ModuleItemContent::Assignment {
        id: self.content_id.unwrap_or_default(),
      },
      "Quiz" => ModuleItemContent::Quiz {
        id: self.content_id.unwrap_or_default(),
      },
      "SubHeader" => ModuleItemContent::SubHeader,
      "ExternalUrl" => ModuleItemContent::ExternalUrl {
        url: self.external_url.unwrap_or_default(),
      },
      "ExternalTool" => ModuleItemContent::ExternalTool {
        id: self.content_id.unwrap_or_default(),
        url: self.external_url.or(self.url),
      },
      other => ModuleItemContent::Unknown {
        name: other.to_string(),
      },
    };

    ModuleItem {
      course_id: course_id.to_string(),
      module_id: self.module_id,
      id: self.id,
      title: self.title,
      position: self.position,
      indent: self.indent,
      content,
      html_url: self.html_url,
      published: self.published.unwrap_or(true),
      completion_requirement: self.completion_requirement.map(|r| CompletionRequirement {
        kind: CompletionKind::parse(&r.kind),
        min_score: r.min_score,
        completed: r.completed,
      }),
      details: self.content_details.map(|d| ContentDetails {
        points_possible: d.points_possible,
        due_at: d.due_at,
        unlock_at: d.unlock_at,
        lock_at: d.lock_at,
        locked_for_user: d.locked_for_user,
        lock_explanation: d.lock_explanation,
      }),
      mastery_paths: self.mastery_paths.map(|m| MasteryPaths {
        locked: m.locked,
        assignment_set_ids: m.assignment_sets.into_iter().map(|s| s.id).collect(),
        selected_set_id: m.selected_set_id,
      }),
    }
  }
}
