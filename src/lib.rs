//! offcache - offline-first resource cache.
//!
//! A cache controller in the shape of a service worker: each deploy ships a
//! versioned generation that is precached all-or-nothing, activated by
//! deleting every older generation, and then serves requests cache-first
//! with an offline page for failed navigations.

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod generation;
pub mod lifecycle;
pub mod logging;
pub mod nav;
pub mod net;

pub use controller::{ControllerOptions, OfflineCacheController};
pub use error::{CacheError, Result};
