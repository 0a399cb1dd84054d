use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::controller::Controller;
use crate::key::CacheKey;

/// Default floor of strong entries the hard trim leaves in place.
pub const DEFAULT_MIN_HARD_SIZE: usize = 64;

/// Default maximum total weight.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default hot share of the capacity.
pub const DEFAULT_HOT_PERCENT: f32 = 0.75;

pub(crate) type Weigher<V> = dyn Fn(&CacheKey, &V) -> usize + Send + Sync;

/// Intervals and per-pass budgets of background maintenance.
///
/// The hard trim visits strong entries; the weak trim visits weak ones. A weak
/// trim runs after `weak_interval` only if weak records were added since the
/// last one, and unconditionally after `weak_max_interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimSchedule {
	pub hard_interval: Duration,
	/// Most strong records one hard trim removes or downgrades. Vetoed
	/// records do not count.
	pub hard_max_count: usize,
	pub weak_interval: Duration,
	pub weak_max_interval: Duration,
	/// Most weak records one weak trim removes.
	pub weak_max_count: usize,
	/// How often the housekeeper wakes to check whether a pass is due.
	pub tick: Duration,
}

impl Default for TrimSchedule {
	fn default() -> Self {
		Self {
			hard_interval: Duration::from_secs(90),
			hard_max_count: 1000,
			weak_interval: Duration::from_secs(270),
			weak_max_interval: Duration::from_secs(360),
			weak_max_count: 2000,
			tick: Duration::from_secs(30),
		}
	}
}

/// Builder for configuring a [`Cache`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hotend_cache::{CacheBuilder, CacheController, CacheKey};
///
/// let cache = CacheBuilder::new(CacheController::new(|key: &CacheKey| Some(format!("{key:?}"))))
///     .name("labels")
///     .capacity(256)
///     .max_capacity(1024)
///     .hot_percent(0.5)
///     .expire_time(Duration::from_secs(600))
///     .weigher(|_, label: &String| label.len())
///     .build();
///
/// assert_eq!(cache.name(), "labels");
/// assert_eq!(cache.capacity(), 256);
/// ```
pub struct CacheBuilder<V> {
	pub(crate) controller: Arc<dyn Controller<V>>,
	pub(crate) name: Option<String>,
	pub(crate) expire_time: Option<Duration>,
	pub(crate) min_hard_size: usize,
	pub(crate) capacity: usize,
	pub(crate) max_capacity: Option<usize>,
	pub(crate) hot_percent: f32,
	pub(crate) weigher: Option<Box<Weigher<V>>>,
	pub(crate) schedule: TrimSchedule,
	pub(crate) background: bool,
}

impl<V: Send + Sync + 'static> CacheBuilder<V> {
	/// Create a builder around `controller` with default settings.
	pub fn new(controller: impl Controller<V> + 'static) -> Self {
		Self::with_controller(Arc::new(controller))
	}

	/// Create a builder around an already shared controller.
	pub fn with_controller(controller: Arc<dyn Controller<V>>) -> Self {
		Self {
			controller,
			name: None,
			expire_time: None,
			min_hard_size: DEFAULT_MIN_HARD_SIZE,
			capacity: DEFAULT_CAPACITY,
			max_capacity: None,
			hot_percent: DEFAULT_HOT_PERCENT,
			weigher: None,
			schedule: TrimSchedule::default(),
			background: true,
		}
	}

	/// Name used in logs, errors and the housekeeper thread name.
	///
	/// Default: the value type's name.
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	/// Age after which a visited entry is handed to
	/// [`Controller::on_need_refresh`].
	///
	/// Default: never.
	pub fn expire_time(mut self, expire_time: Duration) -> Self {
		self.expire_time = Some(expire_time);
		self
	}

	/// Number of strong entries the hard trim never goes below.
	///
	/// Default: 64
	pub fn min_hard_size(mut self, min_hard_size: usize) -> Self {
		self.min_hard_size = min_hard_size;
		self
	}

	/// Initial maximum total weight.
	///
	/// Default: 1024
	pub fn capacity(mut self, capacity: usize) -> Self {
		assert!(capacity > 0, "capacity must be greater than 0");
		self.capacity = capacity;
		self
	}

	/// Upper bound for capacity growth under admission pressure. A value at
	/// or below `capacity` disables growth.
	///
	/// Default: same as `capacity`
	pub fn max_capacity(mut self, max_capacity: usize) -> Self {
		self.max_capacity = Some(max_capacity);
		self
	}

	/// Share of the capacity reserved for the hot segment.
	///
	/// Valid range: 0.0 to 1.0.
	///
	/// Default: 0.75
	pub fn hot_percent(mut self, percent: f32) -> Self {
		assert!((0.0..=1.0).contains(&percent), "hot_percent must be between 0.0 and 1.0");
		self.hot_percent = percent;
		self
	}

	/// Logical weight of a value. Weights below 1 count as 1.
	///
	/// Default: every value weighs 1
	pub fn weigher<F>(mut self, weigher: F) -> Self
	where
		F: Fn(&CacheKey, &V) -> usize + Send + Sync + 'static,
	{
		self.weigher = Some(Box::new(weigher));
		self
	}

	/// Maintenance intervals and budgets.
	pub fn schedule(mut self, schedule: TrimSchedule) -> Self {
		self.schedule = schedule;
		self
	}

	/// Whether to spawn the housekeeper thread. Without it, maintenance only
	/// runs through [`Cache::run_maintenance`] and friends.
	///
	/// Default: true
	pub fn background_maintenance(mut self, enabled: bool) -> Self {
		self.background = enabled;
		self
	}

	pub(crate) fn resolved_name(&self) -> String {
		self.name.clone().unwrap_or_else(|| type_name::<V>().to_string())
	}

	/// Build the cache with the configured settings.
	pub fn build(self) -> Cache<V> {
		Cache::from_builder(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::controller::CacheController;

	fn controller() -> CacheController<u32> {
		CacheController::new(|_: &CacheKey| Some(1))
	}

	#[test]
	fn test_builder_defaults() {
		let cache = CacheBuilder::new(controller()).background_maintenance(false).build();

		assert!(cache.is_empty());
		assert_eq!(cache.capacity(), DEFAULT_CAPACITY);
		assert_eq!(cache.name(), "u32");
	}

	#[test]
	fn test_builder_settings() {
		let cache = CacheBuilder::new(controller())
			.name("numbers")
			.capacity(10)
			.hot_percent(0.2)
			.background_maintenance(false)
			.build();

		assert_eq!(cache.name(), "numbers");
		assert_eq!(cache.capacity(), 10);
	}

	#[test]
	fn test_default_schedule() {
		let schedule = TrimSchedule::default();
		assert_eq!(schedule.hard_interval, Duration::from_secs(90));
		assert_eq!(schedule.weak_interval, Duration::from_secs(270));
		assert_eq!(schedule.weak_max_interval, Duration::from_secs(360));
		assert_eq!(schedule.hard_max_count, 1000);
		assert_eq!(schedule.weak_max_count, 2000);
	}

	#[test]
	#[should_panic(expected = "hot_percent must be between")]
	fn test_builder_invalid_hot_percent() {
		CacheBuilder::new(controller()).hot_percent(1.5);
	}

	#[test]
	#[should_panic(expected = "capacity must be greater than 0")]
	fn test_builder_zero_capacity() {
		CacheBuilder::new(controller()).capacity(0);
	}
}
