use std::fmt;
use std::sync::Arc;

use crate::entry::Entry;
use crate::key::CacheKey;

/// Policy hooks a [`Cache`](crate::Cache) consults while serving and trimming.
///
/// Implementations must be cheap and must not call back into the cache that
/// invokes them: hooks may run while the cache holds its store lock.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use hotend_cache::{CacheKey, Controller};
///
/// struct Thumbnails;
///
/// impl Controller<Vec<u8>> for Thumbnails {
///     fn create_new_object(&self, key: &CacheKey) -> Option<Vec<u8>> {
///         let id = key.key_at_as::<u32>(0).ok()??;
///         Some(vec![0; *id as usize])
///     }
///
///     fn can_value_be_trimmed(&self, _key: &CacheKey, value: &Arc<Vec<u8>>) -> bool {
///         value.len() > 16
///     }
/// }
/// ```
pub trait Controller<V>: Send + Sync {
	/// Whether the value may be dropped (or downgraded) by a trim pass.
	///
	/// Defaults to `true`.
	fn can_value_be_trimmed(&self, key: &CacheKey, value: &Arc<V>) -> bool {
		let _ = (key, value);
		true
	}

	/// Produce the value for a missing key. `None` when the key cannot be
	/// materialized; the cache reports that as
	/// [`CacheError::ControllerContractViolation`](crate::CacheError::ControllerContractViolation).
	fn create_new_object(&self, key: &CacheKey) -> Option<V>;

	/// Called when `entry` is older than the cache's expire time.
	///
	/// The default stamps the entry as refreshed. Implementations normally
	/// rebuild the payload and hand it to [`Entry::refresh`].
	fn on_need_refresh(&self, key: &CacheKey, entry: &Entry<V>) {
		let _ = key;
		entry.mark_refreshed();
	}
}

type CreateFn<V> = dyn Fn(&CacheKey) -> Option<V> + Send + Sync;
type TrimFn<V> = dyn Fn(&CacheKey, &Arc<V>) -> bool + Send + Sync;
type RefreshFn<V> = dyn Fn(&CacheKey, &Entry<V>) + Send + Sync;

/// A [`Controller`] assembled from closures.
///
/// ```
/// use hotend_cache::{CacheController, CacheKey};
///
/// let controller = CacheController::new(|key: &CacheKey| key.key_at_as::<u32>(0).ok()?.map(|n| n * 2))
///     .trim_with(|_, value| **value > 10);
/// # let _ = controller;
/// ```
pub struct CacheController<V> {
	create: Box<CreateFn<V>>,
	trim: Option<Box<TrimFn<V>>>,
	refresh: Option<Box<RefreshFn<V>>>,
}

impl<V> CacheController<V> {
	/// Controller that creates values with `create` and allows every trim.
	pub fn new<F>(create: F) -> Self
	where
		F: Fn(&CacheKey) -> Option<V> + Send + Sync + 'static,
	{
		Self {
			create: Box::new(create),
			trim: None,
			refresh: None,
		}
	}

	/// Veto trims for which `trim` returns `false`.
	pub fn trim_with<F>(mut self, trim: F) -> Self
	where
		F: Fn(&CacheKey, &Arc<V>) -> bool + Send + Sync + 'static,
	{
		self.trim = Some(Box::new(trim));
		self
	}

	/// Handle expired entries with `refresh`.
	pub fn refresh_with<F>(mut self, refresh: F) -> Self
	where
		F: Fn(&CacheKey, &Entry<V>) + Send + Sync + 'static,
	{
		self.refresh = Some(Box::new(refresh));
		self
	}
}

impl<V> Controller<V> for CacheController<V> {
	fn can_value_be_trimmed(&self, key: &CacheKey, value: &Arc<V>) -> bool {
		self.trim.as_ref().is_none_or(|trim| trim(key, value))
	}

	fn create_new_object(&self, key: &CacheKey) -> Option<V> {
		(self.create)(key)
	}

	fn on_need_refresh(&self, key: &CacheKey, entry: &Entry<V>) {
		match &self.refresh {
			Some(refresh) => refresh(key, entry),
			None => entry.mark_refreshed(),
		}
	}
}

impl<V> fmt::Debug for CacheController<V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CacheController")
			.field("trim", &self.trim.is_some())
			.field("refresh", &self.refresh.is_some())
			.finish_non_exhaustive()
	}
}
