//! Typed fetching with `Link`-header pagination.

use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::transport::{RawResponse, Request, Transport};
use crate::error::{Result, SyncError};

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
  pub items: Vec<T>,
  /// Continuation for the next page, if the server announced one
  pub next: Option<Url>,
}

/// Issues requests and decodes responses. Never touches the local store.
#[derive(Clone)]
pub struct Fetcher {
  transport: Arc<dyn Transport>,
  base: Url,
  per_page: u32,
  max_pages: usize,
}

impl Fetcher {
  pub fn new(transport: Arc<dyn Transport>, mut base: Url) -> Self {
    // Url::join drops the last segment unless the path ends with a slash
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    Self {
      transport,
      base,
      per_page: 50,
      max_pages: 500,
    }
  }

  pub fn with_per_page(mut self, per_page: u32) -> Self {
    self.per_page = per_page;
    self
  }

  pub fn with_max_pages(mut self, max_pages: usize) -> Self {
    self.max_pages = max_pages;
    self
  }

  pub fn base(&self) -> &Url {
    &self.base
  }

  /// Resolve an API path such as `"api/v1/courses/1/modules"`.
  pub fn endpoint(&self, path: &str) -> Result<Url> {
    Ok(self.base.join(path.trim_start_matches('/'))?)
  }

  /// Send a request without decoding the body.
  pub async fn send(&self, request: &Request) -> Result<RawResponse> {
    self.transport.send(request).await
  }

  /// Fetch one page, either the first one or the page `continuation` points at.
  pub async fn fetch_page<T: DeserializeOwned>(
    &self,
    request: &Request,
    continuation: Option<&Url>,
  ) -> Result<Page<T>> {
    let response = match continuation {
      // The continuation URL already carries every query parameter
      Some(next) => self.transport.send(&Request::get(next.clone())).await?,
      None => {
        let mut first = request.clone();
        if !first.has_query("per_page") {
          first = first.with_query("per_page", self.per_page.to_string());
        }
        self.transport.send(&first).await?
      }
    };

    let items = decode_list(&response)?;
    let next = response.header("link").and_then(parse_next_link);
    Ok(Page { items, next })
  }

  /// Follow continuations until the listing is exhausted.
  pub async fn fetch_all<T: DeserializeOwned>(&self, request: &Request) -> Result<Vec<T>> {
    let mut all = Vec::new();
    let mut visited = HashSet::new();
    let mut continuation: Option<Url> = None;
    let mut pages = 0usize;

    loop {
      let page = self.fetch_page::<T>(request, continuation.as_ref()).await?;
      pages += 1;
      all.extend(page.items);

      match page.next {
        None => break,
        Some(next) => {
          if !visited.insert(next.to_string()) {
            warn!(url = %next, "pagination revisited a page, stopping");
            break;
          }
          if pages >= self.max_pages {
            return Err(SyncError::Pagination {
              url: request.url.to_string(),
              pages,
            });
          }
          continuation = Some(next);
        }
      }
    }

    debug!(url = %request.url, pages, items = all.len(), "fetched listing");
    Ok(all)
  }

  /// Fetch a single object.
  pub async fn fetch_one<T: DeserializeOwned>(&self, request: &Request) -> Result<T> {
    let response = self.transport.send(request).await?;
    decode_body(&response.body, &response.url)
  }
}

fn decode_body<T: DeserializeOwned>(body: &[u8], context: &str) -> Result<T> {
  serde_json::from_slice(body).map_err(|source| SyncError::Decode {
    context: context.to_string(),
    source,
  })
}

/// Decode a JSON array element by element so errors name the bad element.
fn decode_list<T: DeserializeOwned>(response: &RawResponse) -> Result<Vec<T>> {
  let values: Vec<Value> = decode_body(&response.body, &response.url)?;
  values
    .into_iter()
    .enumerate()
    .map(|(index, value)| {
      serde_json::from_value(value).map_err(|source| SyncError::Decode {
        context: format!("{} [{}]", response.url, index),
        source,
      })
    })
    .collect()
}

/// Find the `rel="next"` target in an RFC 8288 `Link` header.
pub fn parse_next_link(header: &str) -> Option<Url> {
  header.split(',').find_map(|link| {
    let mut parts = link.split(';');
    let target = parts
      .next()?
      .trim()
      .strip_prefix('<')?
      .strip_suffix('>')?;

    let is_next = parts.any(|param| {
      let Some((name, value)) = param.split_once('=') else {
        return false;
      };
      name.trim().eq_ignore_ascii_case("rel")
        && value
          .trim()
          .trim_matches('"')
          .split_whitespace()
          .any(|rel| rel.eq_ignore_ascii_case("next"))
    });

    if is_next {
      Url::parse(target).ok()
    } else {
      None
    }
  })
}
