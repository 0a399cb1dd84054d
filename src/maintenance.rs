//! Hard and weak trim passes.
//!
//! Both passes walk the store in eviction order (cold tail first) in chunks
//! of [`TRIM_CHUNK`] visits, releasing the write lock between chunks. Records
//! kept by an earlier chunk are skipped by position, so a pass is approximate
//! while other threads mutate the store, but no record is offered to the
//! controller twice in one pass.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use hashbrown::HashSet;
use tracing::{debug, warn};

use crate::cache::{Inner, TrimState};
use crate::entry::Entry;
use crate::key::{CacheKey, PassthroughBuildHasher};
use crate::store::Visit;

/// Records offered to the visitor per write-lock hold.
pub(crate) const TRIM_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimKind {
	/// Pass over strong records.
	Hard,
	/// Pass over weak records.
	Weak,
}

/// Outcome of one trim pass.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimReport {
	pub kind: TrimKind,
	/// Records of the pass's kind offered to the controller.
	pub visited: usize,
	/// Records dropped from the cache.
	pub evicted: usize,
	/// Strong records switched to weak because their value is still in use.
	pub demoted: usize,
	/// Records the controller refused to trim.
	pub vetoed: usize,
	/// Expired records handed to `on_need_refresh`.
	pub refreshed: usize,
	/// Controller callbacks that panicked.
	pub failures: usize,
}

impl TrimReport {
	fn new(kind: TrimKind) -> Self {
		Self {
			kind,
			visited: 0,
			evicted: 0,
			demoted: 0,
			vetoed: 0,
			refreshed: 0,
			failures: 0,
		}
	}

	/// Records removed or downgraded.
	pub fn trimmed(&self) -> usize {
		self.evicted + self.demoted
	}
}

/// Run a controller callback, turning a panic into `None`.
pub(crate) fn guarded<T>(cache: &str, hook: &str, key: &CacheKey, callback: impl FnOnce() -> T) -> Option<T> {
	match panic::catch_unwind(AssertUnwindSafe(callback)) {
		Ok(result) => Some(result),
		Err(_) => {
			warn!(cache, hook, ?key, "controller callback panicked; record skipped");
			None
		}
	}
}

/// Evicted records are not refreshed.
fn forget_expired<V>(expired: &mut Vec<Arc<Entry<V>>>, entry: &Arc<Entry<V>>) {
	if expired.last().is_some_and(|last| Arc::ptr_eq(last, entry)) {
		expired.pop();
	}
}

/// Keys already offered to the controller during one pass.
#[derive(Default)]
struct Offered(HashSet<CacheKey, PassthroughBuildHasher>);

impl Offered {
	/// Record `key`; `false` if it was offered earlier in the pass.
	fn first_time(&mut self, key: &CacheKey) -> bool {
		if self.0.contains(key) {
			return false;
		}
		self.0.insert(key.clone());
		true
	}
}

impl<V: Send + Sync + 'static> Inner<V> {
	/// Trim strong records down towards `min_hard_size`.
	///
	/// At most `hard_max_count` strong records are trimmed, and never more than
	/// `strong - min_hard_size`. Vetoed records do not use up the budget. An
	/// approved record whose value is still owned outside the cache is
	/// downgraded to weak instead of dropped.
	pub(crate) fn hard_pass(&self, state: &mut TrimState) -> TrimReport {
		let mut report = TrimReport::new(TrimKind::Hard);
		let strong = self.store.read().iter().filter(|(_, entry)| !entry.is_weak()).count();
		let mut allowance = strong.saturating_sub(self.min_hard_size);
		let mut budget = self.schedule.hard_max_count;
		let mut offered_keys = Offered::default();
		let mut skip = 0;

		loop {
			let mut expired = Vec::new();
			let progress = {
				let mut store = self.store.write();
				store.trim_window(skip, TRIM_CHUNK, |key, entry, _, _| {
					if entry.is_weak() {
						return Visit::Keep;
					}
					let trimming = allowance > 0 && budget > 0;
					if !trimming && self.expire_time.is_none() {
						return Visit::Stop;
					}
					if !offered_keys.first_time(key) {
						return Visit::Keep;
					}
					report.visited += 1;
					self.collect_expired(entry, &mut expired);

					if !trimming {
						return Visit::Keep;
					}
					let Some(value) = entry.value() else {
						return Visit::Keep;
					};
					match guarded(&self.name, "can_value_be_trimmed", key, || {
						self.controller.can_value_be_trimmed(key, &value)
					}) {
						Some(true) => {
							allowance -= 1;
							budget -= 1;
							drop(value);
							if entry.external_owners().is_some_and(|owners| owners > 0) {
								entry.downgrade();
								report.demoted += 1;
								Visit::Keep
							} else {
								report.evicted += 1;
								forget_expired(&mut expired, entry);
								Visit::Evict
							}
						}
						Some(false) => {
							report.vetoed += 1;
							Visit::Keep
						}
						None => {
							report.failures += 1;
							Visit::Keep
						}
					}
				})
			};
			let offered = progress.kept + progress.evicted.len();
			skip += progress.kept;
			drop(progress.evicted);
			self.refresh_all(expired, &mut report);

			if progress.exhausted || offered < TRIM_CHUNK {
				break;
			}
		}

		state.last_hard = Instant::now();
		self.finish(&report);
		report
	}

	/// Drop reclaimed weak records and controller-approved live ones.
	pub(crate) fn weak_pass(&self, state: &mut TrimState) -> TrimReport {
		let mut report = TrimReport::new(TrimKind::Weak);
		let mut budget = self.schedule.weak_max_count;
		let mut offered_keys = Offered::default();
		let mut skip = 0;
		self.weak_dirty.store(false, Ordering::Relaxed);

		loop {
			let mut expired = Vec::new();
			let progress = {
				let mut store = self.store.write();
				store.trim_window(skip, TRIM_CHUNK, |key, entry, _, _| {
					if !entry.is_weak() {
						return Visit::Keep;
					}
					if budget == 0 {
						return Visit::Stop;
					}
					if !offered_keys.first_time(key) {
						return Visit::Keep;
					}
					report.visited += 1;

					let Some(value) = entry.value() else {
						budget -= 1;
						report.evicted += 1;
						return Visit::Evict;
					};
					self.collect_expired(entry, &mut expired);
					match guarded(&self.name, "can_value_be_trimmed", key, || {
						self.controller.can_value_be_trimmed(key, &value)
					}) {
						Some(true) => {
							budget -= 1;
							report.evicted += 1;
							forget_expired(&mut expired, entry);
							Visit::Evict
						}
						Some(false) => {
							report.vetoed += 1;
							Visit::Keep
						}
						None => {
							report.failures += 1;
							Visit::Keep
						}
					}
				})
			};
			let offered = progress.kept + progress.evicted.len();
			skip += progress.kept;
			drop(progress.evicted);
			self.refresh_all(expired, &mut report);

			if progress.exhausted || offered < TRIM_CHUNK {
				break;
			}
		}

		state.last_weak = Instant::now();
		self.finish(&report);
		report
	}

	fn collect_expired(&self, entry: &Arc<Entry<V>>, expired: &mut Vec<Arc<Entry<V>>>) {
		if let Some(expire_time) = self.expire_time
			&& entry.is_expired(expire_time)
		{
			expired.push(Arc::clone(entry));
		}
	}

	/// Hand expired records to the controller, outside the store lock.
	fn refresh_all(&self, expired: Vec<Arc<Entry<V>>>, report: &mut TrimReport) {
		for entry in expired {
			let key = entry.key();
			match guarded(&self.name, "on_need_refresh", key, || self.controller.on_need_refresh(key, &entry)) {
				Some(()) => report.refreshed += 1,
				None => report.failures += 1,
			}
		}
	}

	fn finish(&self, report: &TrimReport) {
		self.record(report);
		debug!(
			cache = %self.name,
			kind = ?report.kind,
			visited = report.visited,
			evicted = report.evicted,
			demoted = report.demoted,
			vetoed = report.vetoed,
			refreshed = report.refreshed,
			failures = report.failures,
			"trim pass finished"
		);
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::{OnceLock, Weak};
	use std::thread;
	use std::time::Duration;

	use parking_lot::Mutex;

	use crate::builder::CacheBuilder;
	use crate::cache::Cache;
	use crate::controller::CacheController;
	use crate::key::CacheKey;

	use super::*;

	#[test]
	fn test_hard_pass_respects_floor() {
		let cache = CacheBuilder::new(CacheController::new(|_: &CacheKey| Some(0u32)))
			.capacity(200)
			.min_hard_size(64)
			.background_maintenance(false)
			.build();
		for n in 0..100u32 {
			cache.put(CacheKey::single(n), n);
		}

		let report = cache.trim_hard();
		assert_eq!(report.kind, TrimKind::Hard);
		assert_eq!(report.evicted, 36);
		assert_eq!(cache.len(), 64);
	}

	#[test]
	fn test_hard_pass_downgrades_shared_values() {
		let cache = CacheBuilder::new(CacheController::new(|_: &CacheKey| Some(0u32)))
			.min_hard_size(0)
			.background_maintenance(false)
			.build();
		let key = CacheKey::single("shared");
		let held = cache.get(&key).unwrap();

		let report = cache.trim_hard();
		assert_eq!(report.demoted, 1);
		assert_eq!(report.evicted, 0);
		assert!(cache.contains(&key));

		drop(held);
		assert!(!cache.contains(&key));
		let report = cache.trim_weak();
		assert_eq!(report.evicted, 1);
		assert!(cache.is_empty());
	}

	#[test]
	fn test_panicking_veto_is_isolated() {
		let cache = CacheBuilder::new(CacheController::new(|_: &CacheKey| Some(0u32)).trim_with(|key, _| {
			if key.key_at_as::<u32>(0).ok().flatten() == Some(&1) {
				panic!("veto failed");
			}
			true
		}))
		.min_hard_size(0)
		.background_maintenance(false)
		.build();
		for n in 0..3u32 {
			cache.put(CacheKey::single(n), n);
		}

		let report = cache.trim_hard();
		assert_eq!(report.failures, 1);
		assert_eq!(report.evicted, 2);
		assert!(cache.contains(&CacheKey::single(1u32)));
	}

	#[test]
	fn test_expired_records_refreshed() {
		let refreshed = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&refreshed);
		let cache = CacheBuilder::new(
			CacheController::new(|_: &CacheKey| Some(0u32))
				.trim_with(|_, _| false)
				.refresh_with(move |_, entry| {
					counter.fetch_add(1, Ordering::SeqCst);
					entry.mark_refreshed();
				}),
		)
		.expire_time(Duration::from_millis(1))
		.min_hard_size(0)
		.background_maintenance(false)
		.build();
		cache.put(CacheKey::single(1u8), 1);
		thread::sleep(Duration::from_millis(10));

		let report = cache.trim_hard();
		assert_eq!(report.refreshed, 1);
		assert_eq!(report.vetoed, 1);
		assert_eq!(refreshed.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_budget_limits_trims() {
		let cache = CacheBuilder::new(CacheController::new(|_: &CacheKey| Some(0u32)))
			.capacity(2000)
			.min_hard_size(0)
			.background_maintenance(false)
			.build();
		for n in 0..1500u32 {
			cache.put(CacheKey::single(n), n);
		}

		let report = cache.trim_hard();
		assert_eq!(report.evicted, 1000);
		assert_eq!(cache.len(), 500);
	}

	#[test]
	fn test_vetoes_do_not_use_budget() {
		let cache = CacheBuilder::new(
			CacheController::new(|_: &CacheKey| Some(0u32))
				.trim_with(|key, _| key.key_at_as::<u32>(0).ok().flatten().is_some_and(|n| *n >= 1200)),
		)
		.capacity(2000)
		.min_hard_size(0)
		.background_maintenance(false)
		.build();
		for n in 0..1500u32 {
			cache.put(CacheKey::single(n), n);
		}

		let report = cache.trim_hard();
		assert_eq!(report.vetoed, 1200);
		assert_eq!(report.evicted, 300);
		assert_eq!(report.visited, 1500);
		assert!(!cache.contains(&CacheKey::single(1300u32)));
	}

	#[test]
	fn test_record_offered_once_per_pass() {
		let calls: Arc<Mutex<HashMap<u32, usize>>> = Arc::default();
		let handle: Arc<OnceLock<Weak<Cache<u32>>>> = Arc::default();
		let (veto_calls, refresh_handle) = (Arc::clone(&calls), Arc::clone(&handle));

		let cache = Arc::new(
			CacheBuilder::new(
				CacheController::new(|_: &CacheKey| Some(0u32))
					.trim_with(move |key, _| {
						let n = *key.key_at_as::<u32>(0).ok().flatten().unwrap();
						*veto_calls.lock().entry(n).or_insert(0) += 1;
						false
					})
					.refresh_with(move |key, entry| {
						entry.mark_refreshed();
						// Touching an offered record between chunks moves it to the hot segment.
						if key == &CacheKey::single(5u32)
							&& let Some(cache) = refresh_handle.get().and_then(Weak::upgrade)
						{
							cache.get(key).unwrap();
						}
					}),
			)
			.capacity(2000)
			.min_hard_size(0)
			.expire_time(Duration::from_millis(1))
			.background_maintenance(false)
			.build(),
		);
		handle.set(Arc::downgrade(&cache)).unwrap();
		for n in 0..600u32 {
			cache.put(CacheKey::single(n), n);
		}
		thread::sleep(Duration::from_millis(10));

		let report = cache.trim_hard();
		let calls = calls.lock();
		assert_eq!(cache.inner.store.read().segment_of(&CacheKey::single(5u32)), Some(crate::Segment::Hot));
		assert_eq!(calls.get(&5), Some(&1));
		assert!(calls.values().all(|count| *count == 1));
		assert_eq!(report.vetoed, calls.len());
	}
}
