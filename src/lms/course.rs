//! Per-course facade handed out by the session registry.

use crate::cache::{CacheKey, CacheResult, RefreshController, RefreshOutcome, Scope, StoredRecord};
use crate::error::Result;
use crate::events::{AppEvent, EventBus};
use crate::query::{LiveHandle, LiveQuery};

use super::cache::{module_key, modules_cache_key};
use super::use_cases::{remove_cached_item, GetModuleItem, GetModules, MarkModuleItemDone};
use super::types::{Module, ModuleItem};

/// Per-course entry point to the modules feature.
///
/// One instance per course lives in the session registry.
pub struct CourseModules {
  course_id: String,
  controller: RefreshController,
  events: EventBus<AppEvent>,
}

impl CourseModules {
  pub fn new(
    course_id: impl Into<String>,
    controller: RefreshController,
    events: EventBus<AppEvent>,
  ) -> Self {
    Self {
      course_id: course_id.into(),
      controller,
      events,
    }
  }

  pub fn course_id(&self) -> &str {
    &self.course_id
  }

  /// Modules of the course, refreshed when stale or forced.
  pub async fn modules(&self, force: bool) -> Result<CacheResult<Vec<StoredRecord<Module>>>> {
    self
      .controller
      .load(&GetModules::new(&self.course_id), force)
      .await
  }

  /// Cached items of one module in module order, placeholders included.
  pub fn items(&self, module_id: &str) -> Result<Vec<StoredRecord<ModuleItem>>> {
    self
      .controller
      .store()
      .fetch_typed(&self.items_scope(module_id))
  }

  /// One item, refreshed on its own without touching its siblings.
  pub async fn item(
    &self,
    module_id: &str,
    item_id: &str,
    force: bool,
  ) -> Result<CacheResult<Vec<StoredRecord<ModuleItem>>>> {
    let use_case = GetModuleItem::new(&self.course_id, module_id, item_id);
    self.controller.load(&use_case, force).await
  }

  pub async fn mark_item_done(&self, module_id: &str, item_id: &str) -> Result<RefreshOutcome> {
    MarkModuleItemDone::new(&self.course_id, module_id, item_id)
      .execute(&self.controller, &self.events)
      .await
  }

  /// Drop an item from the cache without asking the server.
  pub fn remove_item(&self, item_id: &str) -> Result<Vec<String>> {
    remove_cached_item(self.controller.store(), &self.course_id, item_id)
  }

  /// Call `on_change` whenever a module's cached items change.
  pub fn watch_items<F>(&self, module_id: &str, on_change: F) -> Result<LiveHandle>
  where
    F: Fn(Vec<StoredRecord<ModuleItem>>) + Send + Sync + 'static,
  {
    LiveQuery::<ModuleItem>::subscribe(
      self.controller.store(),
      self.items_scope(module_id),
      on_change,
    )
  }

  /// Force the next read of anything in this course to hit the network.
  pub fn invalidate(&self) -> Result<usize> {
    let modules = self
      .controller
      .invalidate(modules_cache_key(&self.course_id).as_str())?;
    let items = self
      .controller
      .invalidate_prefix(&CacheKey::new("module-item").part(&self.course_id).prefix())?;
    Ok(usize::from(modules) + items)
  }

  fn items_scope(&self, module_id: &str) -> Scope {
    Scope::children_of::<ModuleItem>(&module_key(&self.course_id, module_id))
  }
}
