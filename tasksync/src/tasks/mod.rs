//! Client-side task views kept in sync with the service.
//!
//! [`ViewSet`] is the pure data structure of filter-keyed lists,
//! [`TaskCache`] shares it across tasks and fetches through a
//! [`TaskApi`](crate::api::TaskApi), and [`reconcile()`] folds push events
//! into every loaded view in one pass.

pub mod cache;
pub mod merge;
pub mod reconcile;
pub mod views;

pub use cache::TaskCache;
pub use merge::is_stale;
pub use reconcile::{ReconcileOutcome, reconcile, replay};
pub use views::{InsertAt, ViewSet};
