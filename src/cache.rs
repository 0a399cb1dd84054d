use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::builder::{CacheBuilder, TrimSchedule, Weigher};
use crate::controller::Controller;
use crate::entry::Entry;
use crate::error::{CacheError, Result};
use crate::housekeeper::Housekeeper;
use crate::key::{CacheKey, PassthroughBuildHasher};
use crate::maintenance::{TrimKind, TrimReport, guarded};
use crate::metrics::{CacheMetrics, Counters};
use crate::store::{SegmentedLruStore, Visit};

/// Maximum records an admission scans for room before growing or evicting.
const ADMISSION_SCAN: usize = 64;

pub(crate) type Store<V> = SegmentedLruStore<CacheKey, Arc<Entry<V>>, PassthroughBuildHasher>;

/// Bookkeeping of the maintenance schedule. Holding the lock serializes passes.
pub(crate) struct TrimState {
	pub(crate) last_hard: Instant,
	pub(crate) last_weak: Instant,
}

pub(crate) struct Inner<V> {
	pub(crate) name: String,
	pub(crate) store: RwLock<Store<V>>,
	pub(crate) controller: Arc<dyn Controller<V>>,
	pub(crate) expire_time: Option<Duration>,
	pub(crate) min_hard_size: usize,
	pub(crate) max_capacity: usize,
	pub(crate) weigher: Option<Box<Weigher<V>>>,
	pub(crate) schedule: TrimSchedule,
	pub(crate) trim_state: Mutex<TrimState>,
	/// Set when weak records were added since the last weak trim.
	pub(crate) weak_dirty: AtomicBool,
	pub(crate) counters: Counters,
}

/// A bounded, thread-safe object cache over a segmented hot/cold LRU.
///
/// Values are created on demand by the [`Controller`], held strongly or weakly,
/// and trimmed in the background by a housekeeper thread that consults the
/// controller before dropping anything.
///
/// # Example
///
/// ```
/// use hotend_cache::{cache_key, CacheBuilder, CacheController, CacheKey};
///
/// let cache = CacheBuilder::new(CacheController::new(|key: &CacheKey| {
///     let (name, size) = (key.key_at_as::<&str>(0).ok()??, key.key_at_as::<u32>(1).ok()??);
///     Some(format!("{name}@{size}"))
/// }))
/// .capacity(100)
/// .build();
///
/// let key = cache_key!["avatar", 64u32];
/// let first = cache.get(&key).unwrap();
/// let second = cache.get(&key).unwrap();
/// assert!(std::sync::Arc::ptr_eq(&first, &second));
/// assert_eq!(*first, "avatar@64");
/// ```
pub struct Cache<V> {
	pub(crate) inner: Arc<Inner<V>>,
	housekeeper: Mutex<Option<Housekeeper>>,
}

impl<V: Send + Sync + 'static> Cache<V> {
	pub(crate) fn from_builder(builder: CacheBuilder<V>) -> Self {
		let name = builder.resolved_name();
		let capacity = builder.capacity;
		let now = Instant::now();
		let inner = Arc::new(Inner {
			store: RwLock::new(SegmentedLruStore::with_hasher(
				capacity,
				builder.hot_percent,
				PassthroughBuildHasher,
			)),
			controller: builder.controller,
			expire_time: builder.expire_time,
			min_hard_size: builder.min_hard_size,
			max_capacity: builder.max_capacity.unwrap_or(capacity).max(capacity),
			weigher: builder.weigher,
			schedule: builder.schedule,
			trim_state: Mutex::new(TrimState {
				last_hard: now,
				last_weak: now,
			}),
			weak_dirty: AtomicBool::new(false),
			counters: Counters::default(),
			name,
		});

		let housekeeper = if builder.background {
			let target = Arc::downgrade(&inner);
			Housekeeper::spawn(&inner.name, inner.schedule.tick, move || match target.upgrade() {
				Some(inner) => {
					inner.run_due();
					true
				}
				None => false,
			})
		} else {
			None
		};

		Self {
			inner,
			housekeeper: Mutex::new(housekeeper),
		}
	}

	/// Get the value for `key`, creating it through the controller on a miss.
	///
	/// Fails with [`CacheError::ControllerContractViolation`] if the controller
	/// cannot produce a value; nothing is cached in that case.
	pub fn get(&self, key: &CacheKey) -> Result<Arc<V>> {
		match self.get_with(key, true)? {
			Some(value) => Ok(value),
			None => Err(self.inner.contract_violation(key)),
		}
	}

	/// Get the value for `key`. With `auto_create == false` a miss returns
	/// `Ok(None)` and the controller is not consulted.
	pub fn get_with(&self, key: &CacheKey, auto_create: bool) -> Result<Option<Arc<V>>> {
		if let Some(value) = self.inner.lookup(key) {
			return Ok(Some(value));
		}
		if !auto_create {
			return Ok(None);
		}

		// Created without the store lock; a concurrent creator may win the insert.
		let value = match self.inner.controller.create_new_object(key) {
			Some(value) => Arc::new(value),
			None => return Err(self.inner.contract_violation(key)),
		};
		Counters::bump(&self.inner.counters.creations);
		trace!(cache = %self.inner.name, ?key, "created value on miss");

		match self.inner.insert_if_absent(key, &value, false) {
			Some(resident) => Ok(Some(resident)),
			None => Ok(Some(value)),
		}
	}

	/// Get the value for `key` without creating it.
	pub fn get_if_present(&self, key: &CacheKey) -> Option<Arc<V>> {
		self.inner.lookup(key)
	}

	/// Insert `value` unless a live value is resident.
	///
	/// Returns the resident value and leaves the cache untouched, or `None`
	/// after inserting.
	pub fn put_if_absent(&self, key: CacheKey, value: V) -> Option<Arc<V>> {
		self.put_arc_if_absent(key, Arc::new(value))
	}

	/// [`put_if_absent`](Self::put_if_absent) for an already shared value.
	pub fn put_arc_if_absent(&self, key: CacheKey, value: Arc<V>) -> Option<Arc<V>> {
		self.inner.insert_if_absent(&key, &value, false)
	}

	/// Insert a weak record for `value` unless a live value is resident.
	///
	/// The cache does not keep `value` alive; once every outside owner drops
	/// it, lookups miss and the weak trim removes the record.
	pub fn put_weak_if_absent(&self, key: CacheKey, value: &Arc<V>) -> Option<Arc<V>> {
		self.inner.insert_if_absent(&key, value, true)
	}

	/// Insert or replace the value for `key`, returning the previous live value.
	pub fn put(&self, key: CacheKey, value: V) -> Option<Arc<V>> {
		let value = Arc::new(value);
		let entry = Arc::new(Entry::strong(key.clone(), Arc::clone(&value)));
		let weight = self.inner.weigh(&key, &value);

		let (previous, evicted) = {
			let mut store = self.inner.store.write();
			self.inner.store_entry(&mut store, key, entry, weight)
		};
		drop(evicted);
		previous.and_then(|entry| entry.value())
	}

	/// Remove `key`, returning its value if it was live.
	pub fn remove(&self, key: &CacheKey) -> Option<Arc<V>> {
		let entry = self.inner.store.write().remove(key)?;
		Counters::bump(&self.inner.counters.removals);
		entry.value()
	}

	/// Whether a live value is resident. Does not count as an access.
	pub fn contains(&self, key: &CacheKey) -> bool {
		self.inner.store.read().peek(key).is_some_and(|entry| entry.is_alive())
	}

	/// Number of records, including weak records whose value was reclaimed but
	/// not yet trimmed.
	pub fn len(&self) -> usize {
		self.inner.store.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.store.read().is_empty()
	}

	/// Total weight of resident records.
	pub fn size(&self) -> usize {
		self.inner.store.read().size()
	}

	/// Current maximum total weight.
	pub fn capacity(&self) -> usize {
		self.inner.store.read().max_size()
	}

	/// Change the maximum total weight, evicting immediately if it shrinks.
	pub fn resize(&self, capacity: usize) {
		let evicted = {
			let mut store = self.inner.store.write();
			let hot_percent = store.hot_percent();
			store.resize(capacity, hot_percent)
		};
		Counters::add(&self.inner.counters.evictions, evicted.len());
		debug!(cache = %self.inner.name, capacity, evicted = evicted.len(), "cache resized");
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Snapshot of the cache counters.
	pub fn metrics(&self) -> CacheMetrics {
		let store = self.inner.store.read();
		self.inner.counters.snapshot(store.size(), store.max_size(), store.len())
	}

	/// Drop every record. No controller callbacks run; background maintenance
	/// continues.
	pub fn clear(&self) {
		let drained = {
			let mut store = self.inner.store.write();
			let drained: Vec<_> = store.iter().map(|(_, entry)| Arc::clone(entry)).collect();
			store.clear();
			drained
		};
		debug!(cache = %self.inner.name, records = drained.len(), "cache cleared");
	}

	/// Stop background maintenance and free the store. Idempotent.
	///
	/// The housekeeper is joined first, so no trim pass runs once this
	/// returns. The cache stays usable afterwards but is no longer trimmed in
	/// the background.
	pub fn release_cache(&self) {
		let housekeeper = self.housekeeper.lock().take();
		if let Some(mut housekeeper) = housekeeper {
			housekeeper.stop();
		}
		self.inner.store.write().release();
		debug!(cache = %self.inner.name, "cache released");
	}

	/// Run whichever maintenance passes are due.
	pub fn run_maintenance(&self) -> Vec<TrimReport> {
		self.inner.run_due()
	}

	/// Run a hard trim now, regardless of schedule.
	pub fn trim_hard(&self) -> TrimReport {
		let mut state = self.inner.trim_state.lock();
		self.inner.hard_pass(&mut state)
	}

	/// Run a weak trim now, regardless of schedule.
	pub fn trim_weak(&self) -> TrimReport {
		let mut state = self.inner.trim_state.lock();
		self.inner.weak_pass(&mut state)
	}

	/// Whether a housekeeper thread is running.
	pub fn has_housekeeper(&self) -> bool {
		self.housekeeper.lock().is_some()
	}
}

impl<V: Send + Sync + 'static> Inner<V> {
	fn contract_violation(&self, key: &CacheKey) -> CacheError {
		CacheError::ControllerContractViolation {
			cache: self.name.clone(),
			key: format!("{key:?}"),
		}
	}

	pub(crate) fn weigh(&self, key: &CacheKey, value: &V) -> usize {
		self.weigher.as_ref().map_or(1, |weigher| weigher(key, value)).max(1)
	}

	/// Serve a lookup: live hit, or miss (removing a reclaimed weak record).
	fn lookup(&self, key: &CacheKey) -> Option<Arc<V>> {
		let entry = self.store.write().get(key).cloned();
		let Some(entry) = entry else {
			Counters::bump(&self.counters.misses);
			return None;
		};

		let Some(value) = entry.value() else {
			let mut store = self.store.write();
			if store.peek(key).is_some_and(|current| Arc::ptr_eq(current, &entry)) {
				store.remove(key);
				Counters::bump(&self.counters.evictions);
			}
			drop(store);
			Counters::bump(&self.counters.misses);
			trace!(cache = %self.name, ?key, "weak record reclaimed");
			return None;
		};

		Counters::bump(&self.counters.hits);
		if let Some(expire_time) = self.expire_time
			&& entry.is_expired(expire_time)
		{
			Counters::bump(&self.counters.refreshes);
			self.controller.on_need_refresh(key, &entry);
			return Some(entry.value().unwrap_or(value));
		}
		Some(value)
	}

	/// Insert unless a live value is resident; returns the resident value.
	fn insert_if_absent(&self, key: &CacheKey, value: &Arc<V>, weak: bool) -> Option<Arc<V>> {
		let entry = Arc::new(if weak {
			Entry::weak(key.clone(), value)
		} else {
			Entry::strong(key.clone(), Arc::clone(value))
		});
		let weight = self.weigh(key, value);

		let (previous, evicted) = {
			let mut store = self.store.write();
			if let Some(resident) = store.peek(key).and_then(|entry| entry.value()) {
				return Some(resident);
			}
			self.store_entry(&mut store, key.clone(), entry, weight)
		};
		drop((previous, evicted));

		if weak {
			self.weak_dirty.store(true, Ordering::Relaxed);
		}
		None
	}

	/// Admit one record: make room, then put with overflow eviction.
	fn store_entry(
		&self,
		store: &mut Store<V>,
		key: CacheKey,
		entry: Arc<Entry<V>>,
		weight: usize,
	) -> (Option<Arc<Entry<V>>>, Vec<(CacheKey, Arc<Entry<V>>)>) {
		let mut evicted = self.make_room(store, &key, weight);
		let (previous, overflow) = store.put_evicting(key, entry, weight);

		if previous.is_some() {
			Counters::bump(&self.counters.updates);
		} else {
			Counters::bump(&self.counters.inserts);
		}
		evicted.extend(overflow);
		Counters::add(&self.counters.evictions, evicted.len());
		(previous, evicted)
	}

	/// Free room for `incoming` weight at `key` before the store's own
	/// eviction applies: drop reclaimed weak records and controller-approved
	/// records from the eviction end, then grow the capacity towards
	/// `max_capacity`. A resident record at `key` is replaced in place, so only
	/// the weight difference needs room.
	fn make_room(&self, store: &mut Store<V>, key: &CacheKey, incoming: usize) -> Vec<(CacheKey, Arc<Entry<V>>)> {
		let incoming = incoming.max(1);
		let resident = store.weight_of(key).unwrap_or(0);
		let over = |store: &Store<V>| (store.size() - resident + incoming).saturating_sub(store.max_size());
		let mut excess = over(&*store);
		if excess == 0 {
			return Vec::new();
		}

		let progress = store.trim_window(0, ADMISSION_SCAN, |candidate, entry, _, weight| {
			if excess == 0 {
				return Visit::Stop;
			}
			if candidate == key {
				return Visit::Keep;
			}
			let approved = match entry.value() {
				None => true,
				Some(value) => guarded(&self.name, "can_value_be_trimmed", candidate, || {
					self.controller.can_value_be_trimmed(candidate, &value)
				})
				.unwrap_or(false),
			};
			if approved {
				excess = excess.saturating_sub(weight);
				Visit::Evict
			} else {
				Visit::Keep
			}
		});

		if over(&*store) > 0 && store.max_size() < self.max_capacity {
			let current = store.max_size();
			let grown = (current + current / 2).max(current + 1).min(self.max_capacity);
			let hot_percent = store.hot_percent();
			store.resize(grown, hot_percent);
			debug!(cache = %self.name, from = current, to = grown, "cache capacity grown");
		}

		progress.evicted
	}

	/// Run the passes whose interval has elapsed.
	pub(crate) fn run_due(&self) -> Vec<TrimReport> {
		let mut state = self.trim_state.lock();
		let mut reports = Vec::new();

		if state.last_hard.elapsed() >= self.schedule.hard_interval {
			reports.push(self.hard_pass(&mut state));
		}
		let since_weak = state.last_weak.elapsed();
		let weak_due = (since_weak >= self.schedule.weak_interval && self.weak_dirty.load(Ordering::Relaxed))
			|| since_weak >= self.schedule.weak_max_interval;
		if weak_due {
			reports.push(self.weak_pass(&mut state));
		}

		reports
	}

	pub(crate) fn record(&self, report: &TrimReport) {
		Counters::add(&self.counters.evictions, report.evicted);
		Counters::add(&self.counters.demotions, report.demoted);
		Counters::add(&self.counters.refreshes, report.refreshed);
		if report.kind == TrimKind::Hard && report.demoted > 0 {
			self.weak_dirty.store(true, Ordering::Relaxed);
		}
	}
}

impl<V> Drop for Cache<V> {
	fn drop(&mut self) {
		if let Some(mut housekeeper) = self.housekeeper.get_mut().take() {
			housekeeper.stop();
		}
	}
}

impl<V> fmt::Debug for Cache<V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Cache")
			.field("name", &self.inner.name)
			.field("store", &*self.inner.store.read())
			.finish_non_exhaustive()
	}
}
