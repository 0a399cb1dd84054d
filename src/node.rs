use std::sync::atomic::{AtomicU32, Ordering};

/// Handle of a node inside the store's arena.
pub(crate) type NodeId = usize;

/// Which segment of the list a node lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
	/// Protected entries, confirmed by repeat access.
	Hot,
	/// Probationary entries, newly admitted or demoted.
	Cold,
}

/// List element of the segmented LRU.
///
/// Links point towards the head (`prev`, more recent) and the tail (`next`,
/// less recent) of the node's own segment. The visit counter is atomic so it
/// can be bumped through a shared reference; everything else changes only
/// under exclusive access to the store.
pub(crate) struct Node<K, V> {
	pub(crate) key: K,
	pub(crate) value: V,
	visits: AtomicU32,
	pub(crate) segment: Segment,
	pub(crate) weight: usize,
	pub(crate) prev: Option<NodeId>,
	pub(crate) next: Option<NodeId>,
}

impl<K, V> Node<K, V> {
	/// A fresh, unlinked cold node. Admission counts as the first visit.
	pub(crate) fn new(key: K, value: V, weight: usize) -> Self {
		Self {
			key,
			value,
			visits: AtomicU32::new(1),
			segment: Segment::Cold,
			weight,
			prev: None,
			next: None,
		}
	}

	/// Saturating atomic increment; returns the new count.
	pub(crate) fn increase_visit_count(&self) -> u32 {
		let previous = self
			.visits
			.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| count.checked_add(1))
			.unwrap_or(u32::MAX);
		previous.saturating_add(1)
	}

	/// Overwrite the counter. Exclusive access only (decay, tests).
	pub(crate) fn update_visit_count(&mut self, count: u32) {
		*self.visits.get_mut() = count;
	}

	pub(crate) fn visit_count(&self) -> u32 {
		self.visits.load(Ordering::Relaxed)
	}

	pub(crate) fn is_cold(&self) -> bool {
		self.segment == Segment::Cold
	}
}
