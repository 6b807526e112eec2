//! Cached reads and write actions of the course-modules feature.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::Fetcher;
use crate::cache::{
  reconcile, reconcile_tree, Entity, Listing, Node, Predicate, ReconcileReport, RefreshController,
  RefreshOutcome, Repository, Scope, Store, Transaction, UseCase,
};
use crate::error::Result;
use crate::events::{AppEvent, EventBus};

use super::cache::{
  item_key, module_item_cache_key, module_key, modules_cache_key, MASTERY_PATH_SUFFIX,
};
use super::client::LmsClient;
use super::types::{Module, ModuleItem};

/// Local-only flag set while a "mark done" request is in flight.
pub const COMPLETION_PENDING: &str = "completion_pending";

/// Every module of a course together with every module's items.
///
/// Composite: the module listing, then one item listing per module whose
/// items were not inlined. Nothing is written unless every request succeeded.
#[derive(Debug, Clone)]
pub struct GetModules {
  pub course_id: String,
}

impl GetModules {
  pub fn new(course_id: impl Into<String>) -> Self {
    Self {
      course_id: course_id.into(),
    }
  }
}

#[async_trait]
impl UseCase for GetModules {
  type Response = Vec<Node<Module, ModuleItem>>;
  type Model = Module;

  fn cache_key(&self) -> String {
    modules_cache_key(&self.course_id).into()
  }

  fn scope(&self) -> Scope {
    Scope::children_of::<Module>(&self.course_id)
  }

  async fn make_request(&self, fetcher: &Fetcher) -> Result<Self::Response> {
    let client = LmsClient::new(fetcher.clone());
    let modules = client.get_modules(&self.course_id).await?;

    let pending: Vec<_> = modules
      .iter()
      .filter(|(_, items)| items.is_none())
      .map(|(module, _)| client.get_module_items(&self.course_id, &module.id))
      .collect();
    debug!(
      course_id = %self.course_id,
      modules = modules.len(),
      sub_fetches = pending.len(),
      "fetching module items"
    );

    // Wait for every sub-fetch, then fail with the first error in module order
    let fetched: Vec<Vec<ModuleItem>> = join_all(pending)
      .await
      .into_iter()
      .collect::<Result<_>>()?;
    let mut fetched = fetched.into_iter();

    Ok(
      modules
        .into_iter()
        .map(|(module, items)| {
          let items = items.or_else(|| fetched.next()).unwrap_or_default();
          Node::new(module, Some(items))
        })
        .collect(),
    )
  }

  fn write(&self, tx: &mut Transaction<'_>, response: Self::Response) -> Result<ReconcileReport> {
    reconcile_tree(tx, &response, &self.scope(), Listing::Exhaustive)
  }
}

/// One module item. A partial write: sibling items are never pruned.
#[derive(Debug, Clone)]
pub struct GetModuleItem {
  pub course_id: String,
  pub module_id: String,
  pub item_id: String,
}

impl GetModuleItem {
  pub fn new(
    course_id: impl Into<String>,
    module_id: impl Into<String>,
    item_id: impl Into<String>,
  ) -> Self {
    Self {
      course_id: course_id.into(),
      module_id: module_id.into(),
      item_id: item_id.into(),
    }
  }

  fn module_scope(&self) -> Scope {
    Scope::children_of::<ModuleItem>(&module_key(&self.course_id, &self.module_id))
  }
}

#[async_trait]
impl UseCase for GetModuleItem {
  type Response = ModuleItem;
  type Model = ModuleItem;

  fn cache_key(&self) -> String {
    module_item_cache_key(&self.course_id, &self.module_id, &self.item_id).into()
  }

  /// The item and its synthetic mastery-path row, if any.
  fn scope(&self) -> Scope {
    let key = item_key(&self.course_id, &self.item_id);
    let keys = BTreeSet::from([format!("{}-{}", key, MASTERY_PATH_SUFFIX), key]);
    self.module_scope().filter(Predicate::KeyIn(keys))
  }

  async fn make_request(&self, fetcher: &Fetcher) -> Result<Self::Response> {
    LmsClient::new(fetcher.clone())
      .get_module_item(&self.course_id, &self.module_id, &self.item_id)
      .await
  }

  fn write(&self, tx: &mut Transaction<'_>, response: Self::Response) -> Result<ReconcileReport> {
    reconcile(tx, &[response], &self.module_scope(), Listing::Partial)
  }
}

/// Fulfil a "mark as done" requirement and tell the rest of the app.
#[derive(Debug, Clone)]
pub struct MarkModuleItemDone {
  pub course_id: String,
  pub module_id: String,
  pub item_id: String,
}

impl MarkModuleItemDone {
  pub fn new(
    course_id: impl Into<String>,
    module_id: impl Into<String>,
    item_id: impl Into<String>,
  ) -> Self {
    Self {
      course_id: course_id.into(),
      module_id: module_id.into(),
      item_id: item_id.into(),
    }
  }

  /// PUT the completion, publish
  /// [`AppEvent::ModuleItemRequirementCompleted`], then force-refresh the item
  /// so the cached requirement reflects the server.
  ///
  /// The event goes out as soon as the server accepted the completion, even if
  /// the follow-up refresh fails. The pending flag is cleared however this
  /// future ends, including when it is dropped.
  pub async fn execute(
    &self,
    controller: &RefreshController,
    events: &EventBus<AppEvent>,
  ) -> Result<RefreshOutcome> {
    let store = controller.store();
    let key = item_key(&self.course_id, &self.item_id);

    set_item_flag(store, &key, COMPLETION_PENDING, true)?;
    let _pending = PendingFlag {
      store: store.clone(),
      key: key.clone(),
    };

    let marked = LmsClient::new(controller.fetcher().clone())
      .mark_done(&self.course_id, &self.module_id, &self.item_id)
      .await;
    if let Err(e) = marked {
      warn!(%key, error = %e, "failed to mark module item done");
      return Err(e);
    }

    let delivered = events.publish(&AppEvent::ModuleItemRequirementCompleted {
      course_id: self.course_id.clone(),
      module_id: self.module_id.clone(),
      item_id: self.item_id.clone(),
    });
    info!(%key, delivered, "module item marked done");

    let refresh = GetModuleItem::new(&self.course_id, &self.module_id, &self.item_id);
    controller.refresh(&refresh, true).await.map_err(|e| {
      warn!(%key, error = %e, "marked done but could not re-read the item");
      e
    })
  }
}

/// Clears [`COMPLETION_PENDING`] on drop.
struct PendingFlag {
  store: Store,
  key: String,
}

impl Drop for PendingFlag {
  fn drop(&mut self) {
    if let Err(e) = set_item_flag(&self.store, &self.key, COMPLETION_PENDING, false) {
      warn!(key = %self.key, error = %e, "failed to clear pending flag");
    }
  }
}

/// Set or clear a local-only flag on a cached module item.
///
/// Returns false when the item is not cached.
pub fn set_item_flag(store: &Store, key: &str, flag: &str, value: bool) -> Result<bool> {
  store.write(|tx| {
    let Some(row) = tx.find(ModuleItem::kind(), key)? else {
      return Ok(false);
    };
    let mut local = row.local;
    if value {
      local.insert(flag.to_string(), Value::Bool(true));
    } else {
      local.remove(flag);
    }
    tx.set_local(row.id, &local)?;
    Ok(true)
  })
}

/// Delete one cached module item and its synthetic row, e.g. after the
/// server reported it gone. Returns the deleted keys.
pub fn remove_cached_item(store: &Store, course_id: &str, item_id: &str) -> Result<Vec<String>> {
  let key = item_key(course_id, item_id);
  store.write(|tx| {
    let mut deleted = Vec::new();
    for row in tx.derived_of(ModuleItem::kind(), &key)? {
      tx.delete(row.id)?;
      deleted.push(row.key);
    }
    if let Some(row) = tx.find(ModuleItem::kind(), &key)? {
      tx.delete(row.id)?;
      deleted.push(row.key);
    }
    Ok(deleted)
  })
}
