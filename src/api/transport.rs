//! HTTP transport abstraction and the reqwest-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

/// One outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      query: Vec::new(),
      body: None,
    }
  }

  pub fn put(url: Url) -> Self {
    Self {
      method: Method::Put,
      ..Self::get(url)
    }
  }

  pub fn post(url: Url, body: Value) -> Self {
    Self {
      method: Method::Post,
      body: Some(body),
      ..Self::get(url)
    }
  }

  pub fn delete(url: Url) -> Self {
    Self {
      method: Method::Delete,
      ..Self::get(url)
    }
  }

  pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
    self.query.push((name.to_string(), value.into()));
    self
  }

  pub fn has_query(&self, name: &str) -> bool {
    self.query.iter().any(|(n, _)| n == name)
  }
}

/// A successful response. Non-2xx statuses are reported as errors instead.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
  pub status: u16,
  /// Final URL after redirects
  pub url: String,
  /// Header names are lowercase
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl RawResponse {
  pub fn header(&self, name: &str) -> Option<&str> {
    let name = name.to_ascii_lowercase();
    self
      .headers
      .iter()
      .find(|(n, _)| *n == name)
      .map(|(_, v)| v.as_str())
  }
}

/// Sends requests. Retries, if any, belong here and nowhere above.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &Request) -> Result<RawResponse>;
}

/// Transport over `reqwest` with bearer auth and rate-limit backoff.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  token: String,
  max_retries: u32,
  backoff: Duration,
}

impl HttpTransport {
  pub fn new(token: String, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .gzip(true)
      .deflate(true)
      .user_agent(concat!("coursesync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| SyncError::Transport {
        url: String::new(),
        message: format!("failed to build HTTP client: {}", e),
      })?;

    Ok(Self {
      client,
      token,
      max_retries: 3,
      backoff: Duration::from_millis(500),
    })
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn with_backoff(mut self, backoff: Duration) -> Self {
    self.backoff = backoff;
    self
  }

  fn build(&self, request: &Request) -> Result<reqwest::RequestBuilder> {
    let url = request.url.clone();
    let builder = match request.method {
      Method::Get => self.client.get(url),
      Method::Post => self.client.post(url),
      Method::Put => self.client.put(url),
      Method::Delete => self.client.delete(url),
    };

    let mut builder = builder.bearer_auth(&self.token).query(&request.query);
    if let Some(body) = &request.body {
      builder = builder
        .header(CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(body)?);
    }
    Ok(builder)
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &Request) -> Result<RawResponse> {
    let mut attempt = 0u32;

    loop {
      attempt += 1;
      debug!(method = ?request.method, url = %request.url, attempt, "sending request");

      let response = self
        .build(request)?
        .send()
        .await
        .map_err(|e| SyncError::Transport {
          url: request.url.to_string(),
          message: e.to_string(),
        })?;

      let status = response.status().as_u16();
      let url = response.url().to_string();

      if is_rate_limited(status, response.headers()) {
        if attempt > self.max_retries {
          return Err(SyncError::RateLimited {
            url,
            attempts: attempt,
          });
        }
        let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
        warn!(%url, attempt, ?delay, "rate limited, backing off");
        tokio::time::sleep(delay).await;
        continue;
      }

      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();

      let body = response
        .bytes()
        .await
        .map_err(|e| SyncError::Transport {
          url: url.clone(),
          message: e.to_string(),
        })?
        .to_vec();

      if !(200..300).contains(&status) {
        return Err(SyncError::Http { status, url });
      }

      return Ok(RawResponse {
        status,
        url,
        headers,
        body,
      });
    }
  }
}

/// 429, or the 403 some platforms send with an exhausted rate-limit budget.
fn is_rate_limited(status: u16, headers: &HeaderMap) -> bool {
  if status == 429 {
    return true;
  }
  status == 403
    && headers
      .get("x-rate-limit-remaining")
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.trim().parse::<f64>().ok())
      .map(|remaining| remaining <= 0.0)
      .unwrap_or(false)
}
