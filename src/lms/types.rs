//! Domain types for course modules and their items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A course module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
  pub course_id: String,
  pub id: String,
  pub name: String,
  pub position: Option<i64>,
  pub published: bool,
  pub state: Option<ModuleState>,
  pub unlock_at: Option<DateTime<Utc>>,
  pub require_sequential_progress: bool,
  pub prerequisite_module_ids: Vec<String>,
  pub items_count: u32,
}

/// Progress state of a module for the current user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
  Locked,
  Unlocked,
  Started,
  Completed,
  Other(String),
}

impl ModuleState {
  pub fn parse(s: &str) -> Self {
    match s {
      "locked" => Self::Locked,
      "unlocked" => Self::Unlocked,
      "started" => Self::Started,
      "completed" => Self::Completed,
      other => Self::Other(other.to_string()),
    }
  }
}

/// One entry of a module, in module order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleItem {
  pub course_id: String,
  pub module_id: String,
  pub id: String,
  pub title: String,
  pub position: Option<i64>,
  pub indent: u32,
  pub content: ModuleItemContent,
  pub html_url: Option<String>,
  pub published: bool,
  pub completion_requirement: Option<CompletionRequirement>,
  pub details: Option<ContentDetails>,
  pub mastery_paths: Option<MasteryPaths>,
}

/// What a module item points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleItemContent {
  File { id: String },
  Page { url: String },
  Discussion { id: String },
  Assignment { id: String },
  Quiz { id: String },
  SubHeader,
  ExternalUrl { url: String },
  ExternalTool { id: String, url: Option<String> },
  /// Synthetic "choose a path" entry following an unresolved mastery-path gate
  MasteryPath {
    trigger_item_id: String,
    assignment_set_ids: Vec<String>,
  },
  Unknown { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequirement {
  pub kind: CompletionKind,
  pub min_score: Option<f64>,
  pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
  MustView,
  MustSubmit,
  MustContribute,
  MinScore,
  MarkDone,
  Other(String),
}

impl CompletionKind {
  pub fn parse(s: &str) -> Self {
    match s {
      "must_view" => Self::MustView,
      "must_submit" => Self::MustSubmit,
      "must_contribute" => Self::MustContribute,
      "min_score" => Self::MinScore,
      "must_mark_done" => Self::MarkDone,
      other => Self::Other(other.to_string()),
    }
  }
}

/// Due dates and lock state of the item's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDetails {
  pub points_possible: Option<f64>,
  pub due_at: Option<DateTime<Utc>>,
  pub unlock_at: Option<DateTime<Utc>>,
  pub lock_at: Option<DateTime<Utc>>,
  pub locked_for_user: bool,
  pub lock_explanation: Option<String>,
}

/// Conditional release attached to a gating item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryPaths {
  /// The gate is still closed (e.g. the trigger is not graded yet)
  pub locked: bool,
  pub assignment_set_ids: Vec<String>,
  pub selected_set_id: Option<String>,
}

impl MasteryPaths {
  /// The user has to pick one of several paths before continuing.
  pub fn awaits_choice(&self) -> bool {
    !self.locked && self.selected_set_id.is_none() && !self.assignment_set_ids.is_empty()
  }
}
