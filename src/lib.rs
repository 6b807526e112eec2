//! Offline-first sync and cache engine for learning-platform course data.
//!
//! A use case names a cache key and a [`cache::Scope`], fetches through the
//! [`api::Fetcher`], and reconciles the response into the local
//! [`cache::Store`]. The [`cache::RefreshController`] decides when the network
//! is needed at all, and [`query::LiveQuery`] tells observers when the data
//! they read has changed.

pub mod api;
pub mod cache;
pub mod error;
pub mod events;
pub mod lms;
pub mod query;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, SyncError};
pub use session::Session;
