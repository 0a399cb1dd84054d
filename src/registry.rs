//! Process-wide directory of shared caches, one per value type.

use std::any::{Any, TypeId};
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::info;

use crate::builder::CacheBuilder;
use crate::cache::Cache;
use crate::controller::Controller;

static GLOBAL: Lazy<CacheRegistry> = Lazy::new(CacheRegistry::new);

struct Registered {
	name: String,
	cache: Arc<dyn Any + Send + Sync>,
}

/// Maps a value type to the single [`Cache`] shared for it.
///
/// Caches are kept in registration order. Use [`CacheRegistry::global`] for
/// the process-wide instance or [`CacheRegistry::new`] for a scoped one.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use hotend_cache::{CacheBuilder, CacheController, CacheKey, CacheRegistry};
///
/// #[derive(Debug)]
/// struct Glyph(char);
///
/// let registry = CacheRegistry::new();
/// let glyphs = registry.build_cache(
///     CacheBuilder::new(CacheController::new(|key: &CacheKey| key.key_at_as::<char>(0).ok()?.map(|c| Glyph(*c))))
///         .background_maintenance(false),
/// );
///
/// let again = registry.get_cache_for::<Glyph>().unwrap();
/// assert!(Arc::ptr_eq(&glyphs, &again));
/// ```
pub struct CacheRegistry {
	caches: RwLock<IndexMap<TypeId, Registered>>,
}

impl CacheRegistry {
	pub fn new() -> Self {
		Self {
			caches: RwLock::new(IndexMap::new()),
		}
	}

	/// The process-wide registry.
	pub fn global() -> &'static CacheRegistry {
		&GLOBAL
	}

	/// The cache registered for `V`, if any.
	pub fn get_cache_for<V: Send + Sync + 'static>(&self) -> Option<Arc<Cache<V>>> {
		let caches = self.caches.read();
		downcast(caches.get(&TypeId::of::<V>())?)
	}

	/// The cache registered for `V`, building and registering one from
	/// `builder` if there is none. The builder is discarded when a cache
	/// already exists.
	pub fn build_cache<V: Send + Sync + 'static>(&self, builder: CacheBuilder<V>) -> Arc<Cache<V>> {
		if let Some(cache) = self.get_cache_for::<V>() {
			return cache;
		}

		let mut caches = self.caches.write();
		if let Some(cache) = caches.get(&TypeId::of::<V>()).and_then(downcast::<V>) {
			return cache;
		}

		let cache = Arc::new(builder.build());
		let name = cache.name().to_string();
		info!(cache = %name, "cache registered");
		caches.insert(
			TypeId::of::<V>(),
			Registered {
				name,
				cache: Arc::clone(&cache) as Arc<dyn Any + Send + Sync>,
			},
		);
		cache
	}

	/// [`build_cache`](Self::build_cache) with default settings around `controller`.
	pub fn build_cache_for<V: Send + Sync + 'static>(&self, controller: impl Controller<V> + 'static) -> Arc<Cache<V>> {
		if let Some(cache) = self.get_cache_for::<V>() {
			return cache;
		}
		self.build_cache(CacheBuilder::new(controller))
	}

	/// Unregister the cache for `V` and release it.
	///
	/// Returns the released cache; outstanding handles stay valid but the
	/// cache is empty and no longer maintained in the background.
	pub fn remove_cache<V: Send + Sync + 'static>(&self) -> Option<Arc<Cache<V>>> {
		let registered = self.caches.write().shift_remove(&TypeId::of::<V>())?;
		let cache = downcast::<V>(&registered)?;
		cache.release_cache();
		info!(cache = %registered.name, "cache unregistered");
		Some(cache)
	}

	pub fn len(&self) -> usize {
		self.caches.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.caches.read().is_empty()
	}

	/// Names of the registered caches, in registration order.
	pub fn cache_names(&self) -> Vec<String> {
		self.caches.read().values().map(|registered| registered.name.clone()).collect()
	}
}

impl Default for CacheRegistry {
	fn default() -> Self {
		Self::new()
	}
}

fn downcast<V: Send + Sync + 'static>(registered: &Registered) -> Option<Arc<Cache<V>>> {
	Arc::clone(&registered.cache).downcast::<Cache<V>>().ok()
}
