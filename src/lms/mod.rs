//! Course modules feature: API payloads, cached entities and use cases.

pub mod api_types;
mod cache;
mod client;
mod course;
pub mod types;
mod use_cases;

pub use cache::{
  item_key, module_item_cache_key, module_key, modules_cache_key, MASTERY_PATH_SUFFIX,
};
pub use client::LmsClient;
pub use course::CourseModules;
pub use types::{
  CompletionKind, CompletionRequirement, ContentDetails, MasteryPaths, Module, ModuleItem,
  ModuleItemContent, ModuleState,
};
pub use use_cases::{
  remove_cached_item, set_item_flag, GetModuleItem, GetModules, MarkModuleItemDone,
  COMPLETION_PENDING,
};
