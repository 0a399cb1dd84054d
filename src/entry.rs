use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::key::CacheKey;

/// Process-wide origin for entry timestamps.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since [`EPOCH`].
pub(crate) fn now_nanos() -> u64 {
	EPOCH.elapsed().as_nanos() as u64
}

/// How an entry holds its payload.
pub(crate) enum Payload<V> {
	/// The cache owns the value and keeps it alive.
	Strong(Arc<V>),
	/// The value is owned elsewhere and may be reclaimed at any time.
	Weak(Weak<V>),
}

/// A cache record: key, payload (strong or weak) and last refresh time.
///
/// Entries are shared between the store and whoever is handed one by a
/// [`Controller`](crate::Controller) callback, so the payload and timestamp
/// use interior mutability. Reads of a weak entry re-check liveness every
/// time and report a reclaimed referent as `None`.
pub struct Entry<V> {
	key: CacheKey,
	payload: RwLock<Payload<V>>,
	/// Nanoseconds since [`EPOCH`] of the last refresh (or construction).
	last_refresh: AtomicU64,
}

impl<V> Entry<V> {
	/// Create a strong entry that keeps `value` alive.
	pub(crate) fn strong(key: CacheKey, value: Arc<V>) -> Self {
		Self::with_payload(key, Payload::Strong(value))
	}

	/// Create a weak entry that does not keep `value` alive.
	pub(crate) fn weak(key: CacheKey, value: &Arc<V>) -> Self {
		Self::with_payload(key, Payload::Weak(Arc::downgrade(value)))
	}

	fn with_payload(key: CacheKey, payload: Payload<V>) -> Self {
		Self {
			key,
			payload: RwLock::new(payload),
			last_refresh: AtomicU64::new(now_nanos()),
		}
	}

	/// The key this entry is stored under.
	pub fn key(&self) -> &CacheKey {
		&self.key
	}

	/// The cached value, or `None` if this is a weak entry whose referent
	/// has been dropped.
	pub fn value(&self) -> Option<Arc<V>> {
		match &*self.payload.read() {
			Payload::Strong(value) => Some(Arc::clone(value)),
			Payload::Weak(value) => value.upgrade(),
		}
	}

	/// Whether the entry holds its payload weakly.
	pub fn is_weak(&self) -> bool {
		matches!(&*self.payload.read(), Payload::Weak(_))
	}

	/// Whether the payload can still be read.
	pub fn is_alive(&self) -> bool {
		match &*self.payload.read() {
			Payload::Strong(_) => true,
			Payload::Weak(value) => value.strong_count() > 0,
		}
	}

	/// Replace the payload, keeping the holding mode, and stamp the refresh time.
	///
	/// For a weak entry the caller must keep `value` alive for the entry to
	/// stay readable.
	pub fn refresh(&self, value: Arc<V>) {
		{
			let mut payload = self.payload.write();
			*payload = match &*payload {
				Payload::Strong(_) => Payload::Strong(value),
				Payload::Weak(_) => Payload::Weak(Arc::downgrade(&value)),
			};
		}
		self.mark_refreshed();
	}

	/// Stamp the refresh time without touching the payload.
	pub fn mark_refreshed(&self) {
		self.last_refresh.store(now_nanos(), Ordering::Release);
	}

	/// Time since construction or the last refresh.
	pub fn age(&self) -> Duration {
		let last = self.last_refresh.load(Ordering::Acquire);
		Duration::from_nanos(now_nanos().saturating_sub(last))
	}

	/// Whether the entry is older than `expire_time`.
	pub(crate) fn is_expired(&self, expire_time: Duration) -> bool {
		self.age() > expire_time
	}

	/// Switch a strong entry to weak mode.
	///
	/// Returns `false` if the entry was already weak.
	pub(crate) fn downgrade(&self) -> bool {
		let mut payload = self.payload.write();
		let weak = match &*payload {
			Payload::Strong(value) => Arc::downgrade(value),
			Payload::Weak(_) => return false,
		};
		*payload = Payload::Weak(weak);
		true
	}

	/// Number of owners of a strong payload outside this entry, `None` for weak
	/// entries.
	pub(crate) fn external_owners(&self) -> Option<usize> {
		match &*self.payload.read() {
			Payload::Strong(value) => Some(Arc::strong_count(value) - 1),
			Payload::Weak(_) => None,
		}
	}
}

impl<V> fmt::Debug for Entry<V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Entry")
			.field("key", &self.key)
			.field("weak", &self.is_weak())
			.field("alive", &self.is_alive())
			.field("age", &self.age())
			.finish()
	}
}
