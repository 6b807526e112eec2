//! Composition root for one signed-in user.

use std::sync::Arc;

use tracing::info;

use crate::api::Fetcher;
use crate::cache::{RefreshController, Store};
use crate::error::Result;
use crate::events::{AppEvent, EventBus, ReviewPromptTracker, DEFAULT_REVIEW_THRESHOLD};
use crate::lms::CourseModules;
use crate::registry::Registry;

/// What a logout removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutReport {
  pub records: usize,
  pub refresh_stamps: usize,
}

/// Owns the store, the refresh controller, the event bus and the per-course
/// registry. Nothing here is global, so two sessions never share state.
pub struct Session {
  controller: RefreshController,
  events: EventBus<AppEvent>,
  courses: Registry<String, CourseModules>,
  review: ReviewPromptTracker,
}

impl Session {
  pub fn new(store: Store, fetcher: Fetcher) -> Self {
    Self::with_controller(RefreshController::new(store, fetcher))
  }

  pub fn with_controller(controller: RefreshController) -> Self {
    let events = EventBus::new();
    let review = ReviewPromptTracker::new(&events, DEFAULT_REVIEW_THRESHOLD);
    Self {
      controller,
      events,
      courses: Registry::new(),
      review,
    }
  }

  /// The shared modules entry point of `course_id`.
  pub fn course(&self, course_id: &str) -> Arc<CourseModules> {
    self.courses.get_or_insert_with(&course_id.to_string(), || {
      CourseModules::new(course_id, self.controller.clone(), self.events.clone())
    })
  }

  pub fn controller(&self) -> &RefreshController {
    &self.controller
  }

  pub fn store(&self) -> &Store {
    self.controller.store()
  }

  pub fn events(&self) -> &EventBus<AppEvent> {
    &self.events
  }

  pub fn review(&self) -> &ReviewPromptTracker {
    &self.review
  }

  /// Forget everything cached for this user.
  ///
  /// In-flight refreshes are superseded and every TTL stamp and record is
  /// removed in one unit of work, so the next read of any key goes to the
  /// network.
  pub fn logout(&self) -> Result<LogoutReport> {
    let (records, refresh_stamps) = self.controller.purge()?;
    self.courses.clear();
    self.events.publish(&AppEvent::SessionEnded);

    info!(records, refresh_stamps, "session ended, cache purged");
    Ok(LogoutReport {
      records,
      refresh_stamps,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Method;
  use crate::cache::CacheSource;
  use crate::testing::{fetcher, RouteTransport};
  use std::sync::atomic::{AtomicBool, Ordering};

  fn serve(transport: &RouteTransport) {
    transport.get(
      "/api/v1/courses/7/modules",
      r#"[{"id": 1, "name": "Start", "position": 1, "items": [
        {"id": 3, "module_id": 1, "position": 1, "title": "Done button", "type": "Page", "page_url": "p",
         "completion_requirement": {"type": "must_mark_done", "completed": false}}
      ]}]"#,
    );
  }

  fn session(transport: Arc<RouteTransport>) -> Session {
    Session::new(Store::open_in_memory().unwrap(), fetcher(transport))
  }

  #[tokio::test]
  async fn test_course_registry_shares_instances() {
    let session = session(RouteTransport::new());
    let a = session.course("7");
    let b = session.course("7");
    let other = session.course("8");

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &other));
  }

  #[tokio::test]
  async fn test_logout_purges_and_forces_refresh() {
    let transport = RouteTransport::new();
    serve(&transport);
    let session = session(transport.clone());
    let before = session.course("7");
    before.modules(false).await.unwrap();

    let ended = Arc::new(AtomicBool::new(false));
    let _subscription = {
      let ended = ended.clone();
      session.events().subscribe(move |event| {
        if *event == AppEvent::SessionEnded {
          ended.store(true, Ordering::SeqCst);
        }
      })
    };

    let report = session.logout().unwrap();
    assert_eq!(report.records, 2);
    assert_eq!(report.refresh_stamps, 1);
    assert!(ended.load(Ordering::SeqCst));
    assert!(session.store().last_refresh("modules-7").unwrap().is_none());

    let after = session.course("7");
    assert!(!Arc::ptr_eq(&before, &after));
    let reloaded = after.modules(false).await.unwrap();
    assert_eq!(reloaded.source, CacheSource::Network);
    assert_eq!(transport.calls_to(Method::Get, "/api/v1/courses/7/modules"), 2);
  }

  #[tokio::test]
  async fn test_completed_requirements_feed_review_prompt() {
    let transport = RouteTransport::new();
    serve(&transport);
    transport.json(Method::Put, "/api/v1/courses/7/modules/1/items/3/done", "{}");
    transport.get(
      "/api/v1/courses/7/modules/1/items/3",
      r#"{"id": 3, "module_id": 1, "position": 1, "title": "Done button", "type": "Page", "page_url": "p",
          "completion_requirement": {"type": "must_mark_done", "completed": true}}"#,
    );
    let session = session(transport);
    let course = session.course("7");
    course.modules(false).await.unwrap();

    for _ in 0..DEFAULT_REVIEW_THRESHOLD {
      course.mark_item_done("1", "3").await.unwrap();
    }

    assert!(session.review().should_prompt());
  }
}
