//! REST client for course modules and module items.

use tracing::debug;

use crate::api::{Fetcher, Request};
use crate::error::Result;

use super::api_types::{ApiModule, ApiModuleItem};
use super::types::{Module, ModuleItem};

/// Course API client. Decodes responses into domain types; never caches.
#[derive(Clone)]
pub struct LmsClient {
  fetcher: Fetcher,
}

impl LmsClient {
  pub fn new(fetcher: Fetcher) -> Self {
    Self { fetcher }
  }

  /// Every module of a course, with items when the server inlines them.
  pub async fn get_modules(
    &self,
    course_id: &str,
  ) -> Result<Vec<(Module, Option<Vec<ModuleItem>>)>> {
    let url = self
      .fetcher
      .endpoint(&format!("api/v1/courses/{}/modules", course_id))?;
    let request = Request::get(url)
      .with_query("include[]", "items")
      .with_query("include[]", "content_details");

    let modules: Vec<ApiModule> = self.fetcher.fetch_all(&request).await?;
    debug!(course_id, modules = modules.len(), "fetched modules");

    Ok(
      modules
        .into_iter()
        .map(|module| module.into_domain(course_id))
        .collect(),
    )
  }

  /// All items of one module, in module order.
  pub async fn get_module_items(
    &self,
    course_id: &str,
    module_id: &str,
  ) -> Result<Vec<ModuleItem>> {
    let url = self.fetcher.endpoint(&format!(
      "api/v1/courses/{}/modules/{}/items",
      course_id, module_id
    ))?;
    let request = Request::get(url)
      .with_query("include[]", "content_details")
      .with_query("include[]", "mastery_paths");

    let items: Vec<ApiModuleItem> = self.fetcher.fetch_all(&request).await?;
    Ok(
      items
        .into_iter()
        .map(|item| item.into_domain(course_id))
        .collect(),
    )
  }

  /// A single module item.
  pub async fn get_module_item(
    &self,
    course_id: &str,
    module_id: &str,
    item_id: &str,
  ) -> Result<ModuleItem> {
    let url = self.fetcher.endpoint(&format!(
      "api/v1/courses/{}/modules/{}/items/{}",
      course_id, module_id, item_id
    ))?;
    let request = Request::get(url)
      .with_query("include[]", "content_details")
      .with_query("include[]", "mastery_paths");

    let item: ApiModuleItem = self.fetcher.fetch_one(&request).await?;
    Ok(item.into_domain(course_id))
  }

  /// Fulfil a "mark as done" requirement.
  pub async fn mark_done(&self, course_id: &str, module_id: &str, item_id: &str) -> Result<()> {
    let url = self.fetcher.endpoint(&format!(
      "api/v1/courses/{}/modules/{}/items/{}/done",
      course_id, module_id, item_id
    ))?;
    self.fetcher.send(&Request::put(url)).await?;
    Ok(())
  }

  pub fn fetcher(&self) -> &Fetcher {
    &self.fetcher
  }
}
