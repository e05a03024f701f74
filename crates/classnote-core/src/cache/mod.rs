//! Generational response cache.
//!
//! A `CacheStorage` holds named `CacheStore`s, one per cache generation
//! (e.g. `classnote-v3`). Each store maps a request identity (method and
//! URL) to the response that was stored for it. Storage is either purely
//! in memory or backed by one JSON file per generation in a directory,
//! so cached assets survive a restart.
//!
//! A whole generation is dropped at once when a newer one activates.

pub mod storage;
pub mod store;

pub use storage::{is_valid_generation_name, CacheStorage};
pub use store::{CacheStore, CachedResponse};
