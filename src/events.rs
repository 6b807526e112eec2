//! Process-wide typed event bus.
//!
//! Fire-and-forget: an event reaches the listeners registered at the time it
//! is published and nobody else. Listeners stay registered until their
//! [`Subscription`] is explicitly unsubscribed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, trace};

/// Cross-cutting application events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
  /// The user fulfilled a module item's completion requirement
  ModuleItemRequirementCompleted {
    course_id: String,
    module_id: String,
    item_id: String,
  },
  /// The session was logged out and its cache purged
  SessionEnded,
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E> {
  next_id: u64,
  by_id: BTreeMap<u64, Listener<E>>,
}

trait Detach: Send + Sync {
  fn detach(&self, id: u64);
}

impl<E> Detach for Mutex<Listeners<E>> {
  fn detach(&self, id: u64) {
    let mut listeners = self.lock().unwrap_or_else(PoisonError::into_inner);
    listeners.by_id.remove(&id);
  }
}

/// Typed publish/subscribe hub. Clones share listeners.
pub struct EventBus<E> {
  inner: Arc<Mutex<Listeners<E>>>,
}

impl<E> Clone for EventBus<E> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<E: 'static> Default for EventBus<E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<E: 'static> EventBus<E> {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(Listeners {
        next_id: 0,
        by_id: BTreeMap::new(),
      })),
    }
  }

  fn listeners(&self) -> MutexGuard<'_, Listeners<E>> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register `listener` for every event published from now on.
  pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
    let id = {
      let mut listeners = self.listeners();
      let id = listeners.next_id;
      listeners.next_id += 1;
      listeners.by_id.insert(id, Arc::new(listener));
      id
    };
    trace!(id, "event listener registered");

    let bus: Weak<dyn Detach> = Arc::downgrade(&self.inner) as Weak<dyn Detach>;
    Subscription {
      bus,
      id,
      active: AtomicBool::new(true),
    }
  }

  /// Deliver `event` to the current listeners, returning how many received it.
  ///
  /// Listeners run on the publishing thread, outside the registry lock, so a
  /// listener may subscribe or unsubscribe while handling an event.
  pub fn publish(&self, event: &E) -> usize {
    let snapshot: Vec<Listener<E>> = self.listeners().by_id.values().cloned().collect();
    for listener in &snapshot {
      listener(event);
    }
    snapshot.len()
  }

  pub fn listener_count(&self) -> usize {
    self.listeners().by_id.len()
  }
}

/// Registration handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription {
  bus: Weak<dyn Detach>,
  id: u64,
  active: AtomicBool,
}

impl Subscription {
  /// Remove the listener. Idempotent, and a no-op once the bus is gone.
  pub fn unsubscribe(&self) {
    if !self.active.swap(false, Ordering::SeqCst) {
      return;
    }
    if let Some(bus) = self.bus.upgrade() {
      bus.detach(self.id);
      debug!(id = self.id, "event listener removed");
    }
  }

  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::SeqCst) && self.bus.strong_count() > 0
  }
}

/// Decides when the user has completed enough work to be asked for an app review.
pub struct ReviewPromptTracker {
  state: Arc<Mutex<ReviewState>>,
  subscription: Subscription,
  threshold: u32,
}

#[derive(Debug, Default)]
struct ReviewState {
  completed: u32,
  prompted: bool,
}

/// Completed requirements before the first review prompt.
pub const DEFAULT_REVIEW_THRESHOLD: u32 = 3;

impl ReviewPromptTracker {
  pub fn new(bus: &EventBus<AppEvent>, threshold: u32) -> Self {
    let state = Arc::new(Mutex::new(ReviewState::default()));
    let listener_state = state.clone();

    let subscription = bus.subscribe(move |event| {
      if let AppEvent::ModuleItemRequirementCompleted { .. } = event {
        let mut state = listener_state
          .lock()
          .unwrap_or_else(PoisonError::into_inner);
        state.completed += 1;
      }
    });

    Self {
      state,
      subscription,
      threshold,
    }
  }

  fn state(&self) -> MutexGuard<'_, ReviewState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn completed(&self) -> u32 {
    self.state().completed
  }

  pub fn should_prompt(&self) -> bool {
    let state = self.state();
    !state.prompted && state.completed >= self.threshold
  }

  pub fn mark_prompted(&self) {
    self.state().prompted = true;
  }

  /// Stop counting events.
  pub fn detach(&self) {
    self.subscription.unsubscribe();
  }
}
