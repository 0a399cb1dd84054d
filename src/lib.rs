//! # Hotend Cache
//!
//! A bounded, in-process object cache with:
//! - **Segmented hot/cold LRU** eviction (new entries start cold, repeat
//!   accesses promote them to the protected hot segment)
//! - **Composite keys** built from any number of hashable identity values
//! - **Strong and weak records** (the cache can track values it does not own)
//! - **Controller callbacks** to create missing values, veto trims and
//!   refresh stale entries
//! - **Background maintenance** on a housekeeper thread
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use hotend_cache::{cache_key, CacheBuilder, CacheController, CacheKey};
//!
//! #[derive(Debug)]
//! struct Thumbnail {
//!     path: String,
//!     size: u32,
//! }
//!
//! let cache = CacheBuilder::new(CacheController::new(|key: &CacheKey| {
//!     let path = key.key_at_as::<&str>(0).ok()??;
//!     let size = key.key_at_as::<u32>(1).ok()??;
//!     Some(Thumbnail { path: path.to_string(), size: *size })
//! }))
//! .name("thumbnails")
//! .capacity(512)
//! .build();
//!
//! // Created on first access, shared afterwards.
//! let key = cache_key!["photos/cat.png", 128u32];
//! let thumb = cache.get(&key)?;
//! assert_eq!(thumb.size, 128);
//! assert!(Arc::ptr_eq(&thumb, &cache.get(&key)?));
//!
//! // Track a value owned elsewhere without keeping it alive.
//! let banner = Arc::new(Thumbnail { path: "banner.png".into(), size: 1024 });
//! cache.put_weak_if_absent(cache_key!["banner.png", 1024u32], &banner);
//! drop(banner);
//! assert!(cache.get_if_present(&cache_key!["banner.png", 1024u32]).is_none());
//! # Ok::<(), hotend_cache::CacheError>(())
//! ```
//!
//! ## Thread Safety
//!
//! `Cache<V>` is `Send + Sync` for `V: Send + Sync`; share it through `Arc`
//! or the process-wide [`CacheRegistry`]. Values are handed out as `Arc<V>`,
//! so no lock is held once a lookup returns.

mod builder;
mod cache;
mod controller;
mod entry;
mod error;
mod housekeeper;
mod key;
mod maintenance;
mod metrics;
mod node;
mod registry;
mod store;

pub use builder::{CacheBuilder, DEFAULT_CAPACITY, DEFAULT_HOT_PERCENT, DEFAULT_MIN_HARD_SIZE, TrimSchedule};
pub use cache::Cache;
pub use controller::{CacheController, Controller};
pub use entry::Entry;
pub use error::{CacheError, Result};
pub use key::{CacheKey, Identity, KeyPart};
pub use maintenance::{TrimKind, TrimReport};
pub use metrics::CacheMetrics;
pub use node::Segment;
pub use registry::CacheRegistry;
pub use store::{DEFAULT_PROMOTE_AFTER, Iter, SegmentedLruStore};
