//! Scripted transport and clock shared by tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use url::Url;

use crate::api::{Fetcher, Method, RawResponse, Request, Transport};
use crate::cache::Clock;
use crate::error::{Result, SyncError};

#[derive(Clone)]
enum Route {
  Json(String),
  Status(u16),
  Hang,
}

/// Answers by `(method, path)`, ignoring the query string.
pub(crate) struct RouteTransport {
  routes: Mutex<HashMap<(Method, String), Route>>,
  calls: Mutex<Vec<(Method, String)>>,
}

impl RouteTransport {
  pub(crate) fn new() -> Arc<Self> {
    Arc::new(Self {
      routes: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
    })
  }

  pub(crate) fn json(&self, method: Method, path: &str, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method, path.to_string()), Route::Json(body.to_string()));
  }

  pub(crate) fn get(&self, path: &str, body: &str) {
    self.json(Method::Get, path, body);
  }

  pub(crate) fn fail(&self, method: Method, path: &str, status: u16) {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method, path.to_string()), Route::Status(status));
  }

  /// Requests to this route never answer.
  pub(crate) fn hang(&self, method: Method, path: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method, path.to_string()), Route::Hang);
  }

  pub(crate) fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub(crate) fn calls_to(&self, method: Method, path: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(m, p)| *m == method && p == path)
      .count()
  }
}

#[async_trait]
impl Transport for RouteTransport {
  async fn send(&self, request: &Request) -> Result<RawResponse> {
    let path = request.url.path().to_string();
    self
      .calls
      .lock()
      .unwrap()
      .push((request.method, path.clone()));

    let route = self
      .routes
      .lock()
      .unwrap()
      .get(&(request.method, path))
      .cloned();
    match route {
      Some(Route::Json(body)) => Ok(RawResponse {
        status: 200,
        url: request.url.to_string(),
        headers: Vec::new(),
        body: body.into_bytes(),
      }),
      Some(Route::Hang) => std::future::pending().await,
      Some(Route::Status(status)) => Err(SyncError::Http {
        status,
        url: request.url.to_string(),
      }),
      None => Err(SyncError::Http {
        status: 404,
        url: request.url.to_string(),
      }),
    }
  }
}

pub(crate) fn fetcher(transport: Arc<RouteTransport>) -> Fetcher {
  Fetcher::new(
    transport,
    Url::parse("https://lms.example.com").unwrap(),
  )
}

/// Clock that only moves when told to.
#[derive(Clone)]
pub(crate) struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub(crate) fn new(now: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(Mutex::new(now)),
    }
  }

  pub(crate) fn advance(&self, by: Duration) {
    *self.now.lock().unwrap() += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}
