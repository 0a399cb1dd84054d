//! Segmented LRU eviction engine.
//!
//! The store keeps every node in an arena (`slots`) and links them into two
//! doubly-linked lists addressed by arena handles:
//!
//! ```text
//!   hot:   head (MRU) <-> ... <-> tail (LRU)     protected, repeat-accessed
//!   cold:  head (MRU) <-> ... <-> tail (LRU)     probationary, newly admitted
//! ```
//!
//! A hash index maps keys to handles. New keys enter at the cold head. A cold
//! node that is accessed again is promoted to the hot head; when the hot
//! segment outgrows its share, its tail is demoted back to the cold head.
//! Capacity overflow evicts from the cold tail first and from the hot tail
//! only once the cold segment is empty.
//!
//! All sizes are logical weights (at least 1 per node), not bytes.

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::mem;

use ahash::RandomState;
use hashbrown::HashMap;

use crate::node::{Node, NodeId, Segment};

/// Visit count at which a cold node is promoted: insertion counts as the
/// first visit, so the first repeat access promotes.
pub const DEFAULT_PROMOTE_AFTER: u32 = 2;

/// Decision returned by a trim visitor for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visit {
	Keep,
	Evict,
	Stop,
}

/// Outcome of one windowed trim walk.
pub(crate) struct TrimProgress<K, V> {
	pub(crate) evicted: Vec<(K, V)>,
	pub(crate) kept: usize,
	/// The walk reached the hot head; nothing is left to visit.
	pub(crate) exhausted: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Ends {
	head: Option<NodeId>,
	tail: Option<NodeId>,
}

/// Hot/cold segmented LRU store.
///
/// Not thread-safe on its own; the [`Cache`](crate::Cache) wraps it in an
/// `RwLock`. Visit counters can still be bumped through `&self` via
/// [`peek_counted`](Self::peek_counted).
///
/// # Example
///
/// ```
/// use hotend_cache::SegmentedLruStore;
///
/// // Pure cold LRU: no hot share.
/// let mut store = SegmentedLruStore::new(3, 0.0);
/// for key in 1..=4u32 {
///     store.put(key, key * 10, 1);
/// }
/// assert!(!store.contains(&1));
/// assert_eq!(store.get(&4), Some(&40));
/// ```
pub struct SegmentedLruStore<K, V, S = RandomState> {
	index: HashMap<K, NodeId, S>,
	slots: Vec<Option<Node<K, V>>>,
	free: Vec<NodeId>,
	hot: Ends,
	cold: Ends,
	max_size: usize,
	max_hot_size: usize,
	hot_percent: f32,
	cur_size: usize,
	hot_size: usize,
	promote_after: u32,
}

impl<K, V> SegmentedLruStore<K, V, RandomState>
where
	K: Hash + Eq + Clone,
{
	/// Create a store holding at most `max_size` weight, `hot_percent` of which
	/// may be hot.
	///
	/// # Panics
	///
	/// Panics if `hot_percent` is outside `0.0..=1.0`.
	pub fn new(max_size: usize, hot_percent: f32) -> Self {
		Self::with_hasher(max_size, hot_percent, RandomState::new())
	}
}

impl<K, V, S> SegmentedLruStore<K, V, S>
where
	K: Hash + Eq + Clone,
	S: BuildHasher,
{
	/// Create a store with a custom index hasher.
	pub fn with_hasher(max_size: usize, hot_percent: f32, hasher: S) -> Self {
		check_hot_percent(hot_percent);
		Self {
			index: HashMap::with_hasher(hasher),
			slots: Vec::new(),
			free: Vec::new(),
			hot: Ends::default(),
			cold: Ends::default(),
			max_size,
			max_hot_size: max_hot_size(max_size, hot_percent),
			hot_percent,
			cur_size: 0,
			hot_size: 0,
			promote_after: DEFAULT_PROMOTE_AFTER,
		}
	}

	/// Set the visit count at which a cold node is promoted (minimum 1).
	pub fn with_promote_after(mut self, visits: u32) -> Self {
		self.promote_after = visits.max(1);
		self
	}

	/// Look up a key and record the access: bump its visit count, move it to
	/// the head of its segment and promote it if it is cold and qualifies.
	pub fn get(&mut self, key: &K) -> Option<&V> {
		let id = *self.index.get(key)?;
		self.access(id);
		Some(&self.node(id).value)
	}

	/// Look up a key without touching recency or visit counts.
	pub fn peek(&self, key: &K) -> Option<&V> {
		let id = *self.index.get(key)?;
		Some(&self.node(id).value)
	}

	/// Look up a key and bump its visit count atomically, leaving list order
	/// alone. The count is acted upon at the next structural access.
	pub fn peek_counted(&self, key: &K) -> Option<&V> {
		let id = *self.index.get(key)?;
		let node = self.node(id);
		node.increase_visit_count();
		Some(&node.value)
	}

	/// Insert or replace a value, then evict overflow.
	///
	/// Returns the replaced value; `None` means a fresh insert.
	pub fn put(&mut self, key: K, value: V, weight: usize) -> Option<V> {
		self.put_evicting(key, value, weight).0
	}

	/// Like [`put`](Self::put), also handing back the pairs evicted to make room.
	pub fn put_evicting(&mut self, key: K, value: V, weight: usize) -> (Option<V>, Vec<(K, V)>) {
		let weight = weight.max(1);
		let mut evicted = Vec::new();

		if let Some(&id) = self.index.get(&key) {
			let node = self.node_mut(id);
			let old_value = mem::replace(&mut node.value, value);
			let old_weight = mem::replace(&mut node.weight, weight);
			let hot = node.segment == Segment::Hot;

			self.cur_size = self.cur_size - old_weight + weight;
			if hot {
				self.hot_size = self.hot_size - old_weight + weight;
			}
			self.access(id);
			self.evict_overflow(&mut evicted);
			return (Some(old_value), evicted);
		}

		let id = self.alloc(Node::new(key.clone(), value, weight));
		self.index.insert(key, id);
		self.link_head(id);
		self.cur_size += weight;
		self.evict_overflow(&mut evicted);

		(None, evicted)
	}

	/// Remove a key, returning its value.
	pub fn remove(&mut self, key: &K) -> Option<V> {
		let id = *self.index.get(key)?;
		Some(self.evict_node(id).1)
	}

	/// Whether the key is resident. Does not count as an access.
	pub fn contains(&self, key: &K) -> bool {
		self.index.contains_key(key)
	}

	/// Segment currently holding the key.
	pub fn segment_of(&self, key: &K) -> Option<Segment> {
		let id = *self.index.get(key)?;
		Some(self.node(id).segment)
	}

	/// Current visit count of the key.
	pub fn visit_count(&self, key: &K) -> Option<u32> {
		let id = *self.index.get(key)?;
		Some(self.node(id).visit_count())
	}

	/// Weight the key currently occupies.
	pub fn weight_of(&self, key: &K) -> Option<usize> {
		let id = *self.index.get(key)?;
		Some(self.node(id).weight)
	}

	/// Overwrite the visit count of a resident key.
	pub fn update_visit_count(&mut self, key: &K, count: u32) -> bool {
		match self.index.get(key) {
			Some(&id) => {
				self.node_mut(id).update_visit_count(count);
				true
			}
			None => false,
		}
	}

	/// Walk cold tail→head, then hot tail→head, evicting every node for which
	/// `callback(key, value, visit_count)` returns `true`.
	///
	/// Stops once `max_count` nodes have been evicted. Returns the number
	/// evicted.
	pub fn traverse_trim<F>(&mut self, max_count: usize, mut callback: F) -> usize
	where
		F: FnMut(&K, &V, u32) -> bool,
	{
		if max_count == 0 {
			return 0;
		}
		let mut remaining = max_count;
		let progress = self.trim_window(0, usize::MAX, |key, value, visits, _| {
			if remaining == 0 {
				return Visit::Stop;
			}
			if callback(key, value, visits) {
				remaining -= 1;
				Visit::Evict
			} else {
				Visit::Keep
			}
		});
		progress.evicted.len()
	}

	/// Windowed trim walk in eviction order.
	///
	/// The first `skip` nodes are passed over without consulting `visitor`
	/// (they were kept by an earlier window), then at most `max_visits` nodes
	/// are offered to it as `visitor(key, value, visit_count, weight)`.
	pub(crate) fn trim_window<F>(&mut self, skip: usize, max_visits: usize, mut visitor: F) -> TrimProgress<K, V>
	where
		F: FnMut(&K, &V, u32, usize) -> Visit,
	{
		let mut progress = TrimProgress {
			evicted: Vec::new(),
			kept: 0,
			exhausted: false,
		};
		let mut cursor = self.cold.tail;
		let mut in_hot = false;
		let mut position = 0;
		let mut visited = 0;

		loop {
			let id = match cursor {
				Some(id) => id,
				None if !in_hot => {
					in_hot = true;
					cursor = self.hot.tail;
					continue;
				}
				None => {
					progress.exhausted = true;
					break;
				}
			};

			let prev = self.node(id).prev;
			if position < skip {
				position += 1;
				cursor = prev;
				continue;
			}
			if visited == max_visits {
				break;
			}
			visited += 1;

			let decision = {
				let node = self.node(id);
				visitor(&node.key, &node.value, node.visit_count(), node.weight)
			};
			match decision {
				Visit::Keep => progress.kept += 1,
				Visit::Evict => progress.evicted.push(self.evict_node(id)),
				Visit::Stop => break,
			}
			cursor = prev;
		}

		progress
	}

	/// Change both caps and enforce them immediately.
	///
	/// Evicts from the cold tail, then the hot tail, until within `max_size`,
	/// then demotes hot tails until within the new hot share. Returns the
	/// evicted pairs.
	pub fn resize(&mut self, max_size: usize, hot_percent: f32) -> Vec<(K, V)> {
		check_hot_percent(hot_percent);
		self.max_size = max_size;
		self.hot_percent = hot_percent;
		self.max_hot_size = max_hot_size(max_size, hot_percent);

		let mut evicted = Vec::new();
		self.evict_overflow(&mut evicted);
		self.demote_overflow();
		evicted
	}

	/// Drop every node. No callbacks run; calling it again is a no-op.
	pub fn clear(&mut self) {
		self.index.clear();
		self.slots.clear();
		self.free.clear();
		self.hot = Ends::default();
		self.cold = Ends::default();
		self.cur_size = 0;
		self.hot_size = 0;
	}

	/// Drop every node and give the index and arena memory back.
	pub fn release(&mut self) {
		self.clear();
		self.index.shrink_to_fit();
		self.slots = Vec::new();
		self.free = Vec::new();
	}

	/// Entries in eviction order: cold tail→head, then hot tail→head.
	pub fn iter(&self) -> Iter<'_, K, V, S> {
		Iter {
			store: self,
			cursor: self.cold.tail,
			in_hot: false,
		}
	}

	pub fn len(&self) -> usize {
		self.index.len()
	}

	pub fn is_empty(&self) -> bool {
		self.index.is_empty()
	}

	/// Total weight of resident nodes.
	pub fn size(&self) -> usize {
		self.cur_size
	}

	/// Total weight of hot nodes.
	pub fn hot_size(&self) -> usize {
		self.hot_size
	}

	pub fn max_size(&self) -> usize {
		self.max_size
	}

	pub fn max_hot_size(&self) -> usize {
		self.max_hot_size
	}

	pub fn hot_percent(&self) -> f32 {
		self.hot_percent
	}

	/// Check every bookkeeping invariant by walking the lists.
	///
	/// # Panics
	///
	/// Panics on any drift between counters, links, segment tags and the
	/// index. Such drift is a defect in the store, never a runtime condition.
	pub fn assert_invariants(&self) {
		let mut total = 0;
		let mut hot = 0;
		let mut count = 0;

		for (segment, ends) in [(Segment::Cold, self.cold), (Segment::Hot, self.hot)] {
			let mut prev = None;
			let mut cursor = ends.head;
			while let Some(id) = cursor {
				let node = self.node(id);
				assert_eq!(node.segment, segment, "capacity invariant violated: node in wrong segment");
				assert_eq!(node.prev, prev, "capacity invariant violated: broken back link");
				assert_eq!(
					self.index.get(&node.key),
					Some(&id),
					"capacity invariant violated: list node missing from index"
				);
				total += node.weight;
				if segment == Segment::Hot {
					hot += node.weight;
				}
				count += 1;
				prev = Some(id);
				cursor = node.next;
			}
			assert_eq!(ends.tail, prev, "capacity invariant violated: stale tail");
		}

		assert_eq!(count, self.index.len(), "capacity invariant violated: index and list differ");
		assert_eq!(total, self.cur_size, "capacity invariant violated: cur_size drift");
		assert_eq!(hot, self.hot_size, "capacity invariant violated: hot_size drift");
		assert!(self.cur_size <= self.max_size, "capacity invariant violated: over max_size");
		assert!(self.hot_size <= self.max_hot_size, "capacity invariant violated: over max_hot_size");
		assert!(self.max_hot_size <= self.max_size, "capacity invariant violated: hot cap above max");
	}

	/// The single promotion decision point.
	fn should_promote(&self, node: &Node<K, V>) -> bool {
		node.is_cold() && node.visit_count() >= self.promote_after
	}

	/// Record an access to a resident node.
	fn access(&mut self, id: NodeId) {
		let node = self.node(id);
		node.increase_visit_count();

		if self.should_promote(node) {
			self.unlink(id);
			let node = self.node_mut(id);
			node.segment = Segment::Hot;
			let weight = node.weight;
			self.hot_size += weight;
			self.link_head(id);
		} else {
			self.move_to_head(id);
		}
		self.demote_overflow();
	}

	fn demote_overflow(&mut self) {
		while self.hot_size > self.max_hot_size {
			let Some(id) = self.hot.tail else {
				break;
			};
			self.unlink(id);
			let node = self.node_mut(id);
			node.segment = Segment::Cold;
			let weight = node.weight;
			self.hot_size -= weight;
			self.link_head(id);
		}
	}

	fn evict_overflow(&mut self, evicted: &mut Vec<(K, V)>) {
		while self.cur_size > self.max_size {
			let Some(id) = self.cold.tail.or(self.hot.tail) else {
				break;
			};
			evicted.push(self.evict_node(id));
		}
		debug_assert!(self.cur_size <= self.max_size, "store over capacity after eviction");
	}

	fn evict_node(&mut self, id: NodeId) -> (K, V) {
		self.unlink(id);
		let node = self.dealloc(id);
		self.index.remove(&node.key);
		self.cur_size -= node.weight;
		if node.segment == Segment::Hot {
			self.hot_size -= node.weight;
		}
		(node.key, node.value)
	}

	fn move_to_head(&mut self, id: NodeId) {
		let segment = self.node(id).segment;
		if self.ends(segment).head == Some(id) {
			return;
		}
		self.unlink(id);
		self.link_head(id);
	}

	/// Link an unlinked node at the head of its segment.
	fn link_head(&mut self, id: NodeId) {
		let segment = self.node(id).segment;
		let old_head = self.ends(segment).head;

		let node = self.node_mut(id);
		node.prev = None;
		node.next = old_head;

		match old_head {
			Some(head) => self.node_mut(head).prev = Some(id),
			None => self.ends_mut(segment).tail = Some(id),
		}
		self.ends_mut(segment).head = Some(id);
	}

	fn unlink(&mut self, id: NodeId) {
		let node = self.node_mut(id);
		let segment = node.segment;
		let prev = node.prev.take();
		let next = node.next.take();

		match prev {
			Some(prev) => self.node_mut(prev).next = next,
			None => self.ends_mut(segment).head = next,
		}
		match next {
			Some(next) => self.node_mut(next).prev = prev,
			None => self.ends_mut(segment).tail = prev,
		}
	}

	fn ends(&self, segment: Segment) -> &Ends {
		match segment {
			Segment::Hot => &self.hot,
			Segment::Cold => &self.cold,
		}
	}

	fn ends_mut(&mut self, segment: Segment) -> &mut Ends {
		match segment {
			Segment::Hot => &mut self.hot,
			Segment::Cold => &mut self.cold,
		}
	}

	fn alloc(&mut self, node: Node<K, V>) -> NodeId {
		match self.free.pop() {
			Some(id) => {
				self.slots[id] = Some(node);
				id
			}
			None => {
				self.slots.push(Some(node));
				self.slots.len() - 1
			}
		}
	}

	fn dealloc(&mut self, id: NodeId) -> Node<K, V> {
		let node = self.slots[id].take().expect("dealloc of a free arena slot");
		self.free.push(id);
		node
	}
}

impl<K, V, S> SegmentedLruStore<K, V, S> {
	fn node(&self, id: NodeId) -> &Node<K, V> {
		self.slots[id].as_ref().expect("stale arena handle")
	}

	fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
		self.slots[id].as_mut().expect("stale arena handle")
	}
}

fn check_hot_percent(hot_percent: f32) {
	assert!((0.0..=1.0).contains(&hot_percent), "hot_percent must be between 0.0 and 1.0");
}

fn max_hot_size(max_size: usize, hot_percent: f32) -> usize {
	((max_size as f64 * hot_percent as f64).round() as usize).min(max_size)
}

/// Iterator over a store in eviction order.
pub struct Iter<'a, K, V, S> {
	store: &'a SegmentedLruStore<K, V, S>,
	cursor: Option<NodeId>,
	in_hot: bool,
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S> {
	type Item = (&'a K, &'a V);

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			match self.cursor {
				Some(id) => {
					let node = self.store.node(id);
					self.cursor = node.prev;
					return Some((&node.key, &node.value));
				}
				None if !self.in_hot => {
					self.in_hot = true;
					self.cursor = self.store.hot.tail;
				}
				None => return None,
			}
		}
	}
}

impl<K, V, S> fmt::Debug for SegmentedLruStore<K, V, S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SegmentedLruStore")
			.field("len", &self.index.len())
			.field("cur_size", &self.cur_size)
			.field("max_size", &self.max_size)
			.field("hot_size", &self.hot_size)
			.field("max_hot_size", &self.max_hot_size)
			.finish()
	}
}
