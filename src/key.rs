//! Composite cache keys.
//!
//! A [`CacheKey`] is an ordered tuple of type-erased identity values. Each part
//! carries its own pre-computed hash (of its `TypeId` and value), and the key
//! folds the part hashes together once at construction, so lookups never
//! re-hash the parts.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use crate::error::{CacheError, Result};

/// Seed of the order-sensitive part hash fold.
const HASH_SEED: u64 = 1;

/// A value usable as one component of a [`CacheKey`].
///
/// Implemented for every `Hash + Eq + Debug + Send + Sync + 'static` type, so
/// integers, strings, tuples and plain newtypes all work out of the box.
pub trait Identity: Any + Send + Sync + fmt::Debug {
	/// Upcast for downcasting back to the concrete type.
	fn as_any(&self) -> &dyn Any;

	/// Hash of the concrete type and value.
	fn identity_hash(&self) -> u64;

	/// Equality against another identity; values of different types never match.
	fn identity_eq(&self, other: &dyn Identity) -> bool;
}

impl<T> Identity for T
where
	T: Hash + Eq + fmt::Debug + Send + Sync + 'static,
{
	fn as_any(&self) -> &dyn Any {
		self
	}

	fn identity_hash(&self) -> u64 {
		let mut hasher = ahash::AHasher::default();
		TypeId::of::<T>().hash(&mut hasher);
		self.hash(&mut hasher);
		hasher.finish()
	}

	fn identity_eq(&self, other: &dyn Identity) -> bool {
		other.as_any().downcast_ref::<T>().is_some_and(|other| self == other)
	}
}

/// One type-erased component of a [`CacheKey`].
#[derive(Clone)]
pub struct KeyPart {
	value: Arc<dyn Identity>,
	hash: u64,
}

impl KeyPart {
	/// Wrap an identity value.
	pub fn new<T: Identity>(value: T) -> Self {
		let hash = value.identity_hash();
		Self {
			value: Arc::new(value),
			hash,
		}
	}

	/// Downcast to the concrete type, if it matches.
	pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
		self.value.as_any().downcast_ref()
	}

	/// The erased value.
	pub fn value(&self) -> &dyn Identity {
		&*self.value
	}

	/// Pre-computed hash of this part.
	pub fn hash_value(&self) -> u64 {
		self.hash
	}
}

impl PartialEq for KeyPart {
	fn eq(&self, other: &Self) -> bool {
		if self.hash != other.hash {
			return false;
		}
		Arc::ptr_eq(&self.value, &other.value) || self.value.identity_eq(&*other.value)
	}
}

impl Eq for KeyPart {}

impl Hash for KeyPart {
	fn hash<H: Hasher>(&self, state: &mut H) {
		state.write_u64(self.hash);
	}
}

impl fmt::Debug for KeyPart {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&*self.value, f)
	}
}

#[derive(Clone)]
enum Parts {
	Single(KeyPart),
	Multi(Arc<[KeyPart]>),
}

/// An ordered, fixed-length tuple of identity values with a cached hash.
///
/// Two keys are equal iff their parts are equal element-wise and in order, so
/// `CacheKey::single(x)` and `CacheKey::multi([KeyPart::new(x)])` are
/// interchangeable.
///
/// # Example
///
/// ```
/// use hotend_cache::{cache_key, CacheKey, KeyPart};
///
/// let a = CacheKey::multi([KeyPart::new("user"), KeyPart::new(42u64)]);
/// let b = cache_key!["user", 42u64];
/// assert_eq!(a, b);
/// assert_eq!(a.key_at_as::<u64>(1).unwrap(), Some(&42));
/// assert!(a.key_at(2).is_err());
/// ```
#[derive(Clone)]
pub struct CacheKey {
	parts: Parts,
	hash: u64,
}

impl CacheKey {
	/// Build a one-part key without an intermediate sequence.
	pub fn single<T: Identity>(value: T) -> Self {
		let part = KeyPart::new(value);
		let hash = combine(HASH_SEED, part.hash);
		Self {
			parts: Parts::Single(part),
			hash,
		}
	}

	/// Build a key from an ordered sequence of parts.
	///
	/// # Panics
	///
	/// Panics if `parts` is empty.
	pub fn multi<I>(parts: I) -> Self
	where
		I: IntoIterator<Item = KeyPart>,
	{
		let parts: Arc<[KeyPart]> = parts.into_iter().collect();
		assert!(!parts.is_empty(), "cache key must have at least one part");
		let hash = parts.iter().fold(HASH_SEED, |hash, part| combine(hash, part.hash));
		Self {
			parts: Parts::Multi(parts),
			hash,
		}
	}

	/// All parts, in order.
	pub fn parts(&self) -> &[KeyPart] {
		match &self.parts {
			Parts::Single(part) => std::slice::from_ref(part),
			Parts::Multi(parts) => parts,
		}
	}

	/// Number of parts (always at least one).
	pub fn len(&self) -> usize {
		self.parts().len()
	}

	/// Always `false`; keys have at least one part.
	pub fn is_empty(&self) -> bool {
		false
	}

	/// The part at `index`.
	pub fn key_at(&self, index: usize) -> Result<&KeyPart> {
		let parts = self.parts();
		parts.get(index).ok_or(CacheError::OutOfRange {
			index,
			len: parts.len(),
		})
	}

	/// The part at `index`, downcast to `T`. `Ok(None)` if the type differs.
	pub fn key_at_as<T: 'static>(&self, index: usize) -> Result<Option<&T>> {
		self.key_at(index).map(KeyPart::downcast_ref)
	}

	/// Pre-computed combined hash.
	pub fn hash_value(&self) -> u64 {
		self.hash
	}
}

fn combine(hash: u64, part: u64) -> u64 {
	hash.wrapping_mul(31).wrapping_add(part)
}

impl PartialEq for CacheKey {
	fn eq(&self, other: &Self) -> bool {
		self.hash == other.hash && self.parts() == other.parts()
	}
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		// The combined hash is final; hashers downstream see a single u64.
		state.write_u64(self.hash);
	}
}

impl fmt::Debug for CacheKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.parts()).finish()
	}
}

/// Build a [`CacheKey`] from a list of identity values.
///
/// A single value produces the same key as [`CacheKey::single`].
#[macro_export]
macro_rules! cache_key {
	($($part:expr),+ $(,)?) => {
		$crate::CacheKey::multi([$($crate::KeyPart::new($part)),+])
	};
}

/// Passthrough hasher for keys that already carry their final hash.
#[derive(Default)]
pub(crate) struct PassthroughHasher(u64);

impl Hasher for PassthroughHasher {
	fn finish(&self) -> u64 {
		self.0
	}

	fn write(&mut self, _bytes: &[u8]) {
		panic!("PassthroughHasher only works with u64 hash values");
	}

	fn write_u64(&mut self, i: u64) {
		self.0 = i;
	}
}

/// Build hasher for passthrough (just returns the hash as-is).
#[derive(Clone, Default)]
pub(crate) struct PassthroughBuildHasher;

impl BuildHasher for PassthroughBuildHasher {
	type Hasher = PassthroughHasher;

	fn build_hasher(&self) -> Self::Hasher {
		PassthroughHasher::default()
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::*;

	#[derive(Hash, Eq, PartialEq, Debug)]
	struct UserId(u64);

	#[test]
	fn test_single_equals_multi_of_one() {
		let single = CacheKey::single(7u32);
		let multi = CacheKey::multi([KeyPart::new(7u32)]);

		assert_eq!(single, multi);
		assert_eq!(single.hash_value(), multi.hash_value());
	}

	#[test]
	fn test_order_sensitive() {
		let ab = cache_key!["a", "b"];
		let ba = cache_key!["b", "a"];

		assert_ne!(ab, ba);
		assert_ne!(ab.hash_value(), ba.hash_value());
	}

	#[test]
	fn test_type_sensitive() {
		// Same numeric value, different types: different identities.
		let narrow = CacheKey::single(1u32);
		let wide = CacheKey::single(1u64);

		assert_ne!(narrow, wide);
	}

	#[test]
	fn test_equal_sequences_interchangeable() {
		let mut set = HashSet::new();
		set.insert(cache_key![UserId(3), "avatar"]);

		assert!(set.contains(&cache_key![UserId(3), "avatar"]));
		assert!(!set.contains(&cache_key![UserId(4), "avatar"]));
	}

	#[test]
	fn test_key_at() {
		let key = cache_key![UserId(9), 2u8];

		assert_eq!(key.len(), 2);
		assert_eq!(key.key_at_as::<UserId>(0).unwrap(), Some(&UserId(9)));
		assert_eq!(key.key_at_as::<u64>(1).unwrap(), None);
		assert_eq!(
			key.key_at(2).unwrap_err(),
			CacheError::OutOfRange {
				index: 2,
				len: 2,
			}
		);
	}

	#[test]
	#[should_panic(expected = "at least one part")]
	fn test_empty_multi_panics() {
		CacheKey::multi(Vec::new());
	}

	#[test]
	fn test_debug_lists_parts() {
		let key = cache_key!["img", 5u16];
		assert_eq!(format!("{key:?}"), "[\"img\", 5]");
	}

	#[test]
	fn test_passthrough_hasher() {
		let key = CacheKey::single("x");
		let hash = PassthroughBuildHasher.hash_one(&key);
		assert_eq!(hash, key.hash_value());
	}
}
