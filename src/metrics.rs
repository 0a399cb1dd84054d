//! Cache counters and snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of a cache's counters.
///
/// Sizes are logical weights as produced by the cache's weigher, not bytes.
///
/// # Example
///
/// ```
/// use hotend_cache::{CacheBuilder, CacheController, CacheKey};
///
/// let cache = CacheBuilder::new(CacheController::new(|_: &CacheKey| Some(1u32)))
///     .background_maintenance(false)
///     .build();
/// cache.get(&CacheKey::single("a")).unwrap();
/// cache.get(&CacheKey::single("a")).unwrap();
///
/// let metrics = cache.metrics();
/// assert_eq!(metrics.creations, 1);
/// assert_eq!(metrics.hit_rate(), 0.5);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
	/// Lookups answered from the cache.
	pub hits: u64,
	/// Lookups that found nothing (or a reclaimed weak record).
	pub misses: u64,
	/// Values produced by the controller on a miss.
	pub creations: u64,
	/// New records admitted.
	pub inserts: u64,
	/// Existing records replaced by `put`.
	pub updates: u64,
	/// Records dropped by capacity overflow or trim passes.
	pub evictions: u64,
	/// Records removed explicitly.
	pub removals: u64,
	/// Expired records handed to the controller for refresh.
	pub refreshes: u64,
	/// Strong records downgraded to weak by a hard trim.
	pub demotions: u64,
	/// Current total weight.
	pub current_size: usize,
	/// Current maximum weight.
	pub capacity: usize,
	/// Current number of records.
	pub entry_count: usize,
}

impl CacheMetrics {
	/// Hits over total accesses, 0.0 with no accesses.
	pub fn hit_rate(&self) -> f64 {
		let total = self.total_accesses();
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}

	/// Current size over capacity, 0.0 for a zero capacity.
	pub fn utilization(&self) -> f64 {
		if self.capacity == 0 {
			0.0
		} else {
			self.current_size as f64 / self.capacity as f64
		}
	}

	pub fn total_accesses(&self) -> u64 {
		self.hits + self.misses
	}

	pub fn total_writes(&self) -> u64 {
		self.inserts + self.updates
	}
}

/// Live counters, bumped with relaxed atomics.
#[derive(Debug, Default)]
pub(crate) struct Counters {
	pub(crate) hits: AtomicU64,
	pub(crate) misses: AtomicU64,
	pub(crate) creations: AtomicU64,
	pub(crate) inserts: AtomicU64,
	pub(crate) updates: AtomicU64,
	pub(crate) evictions: AtomicU64,
	pub(crate) removals: AtomicU64,
	pub(crate) refreshes: AtomicU64,
	pub(crate) demotions: AtomicU64,
}

impl Counters {
	pub(crate) fn add(counter: &AtomicU64, n: usize) {
		if n > 0 {
			counter.fetch_add(n as u64, Ordering::Relaxed);
		}
	}

	pub(crate) fn bump(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn snapshot(&self, current_size: usize, capacity: usize, entry_count: usize) -> CacheMetrics {
		CacheMetrics {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			creations: self.creations.load(Ordering::Relaxed),
			inserts: self.inserts.load(Ordering::Relaxed),
			updates: self.updates.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
			removals: self.removals.load(Ordering::Relaxed),
			refreshes: self.refreshes.load(Ordering::Relaxed),
			demotions: self.demotions.load(Ordering::Relaxed),
			current_size,
			capacity,
			entry_count,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_rates_with_no_activity() {
		let metrics = CacheMetrics::default();
		assert_eq!(metrics.hit_rate(), 0.0);
		assert_eq!(metrics.utilization(), 0.0);
	}

	#[test]
	fn test_snapshot_reads_counters() {
		let counters = Counters::default();
		Counters::bump(&counters.hits);
		Counters::bump(&counters.hits);
		Counters::bump(&counters.misses);
		Counters::add(&counters.evictions, 3);

		let metrics = counters.snapshot(5, 10, 4);
		assert_eq!(metrics.total_accesses(), 3);
		assert!((metrics.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
		assert_eq!(metrics.evictions, 3);
		assert_eq!(metrics.utilization(), 0.5);
	}
}
