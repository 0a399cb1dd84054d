use thiserror::Error;

/// Errors surfaced by the cache.
///
/// A miss is never an error: lookups that may miss return `Option`. Bookkeeping
/// drift inside the store is a defect and panics in debug builds instead of
/// showing up here.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
	/// A key component was requested past the end of the key.
	#[error("key component {index} is out of range for a key of length {len}")]
	OutOfRange {
		index: usize,
		len: usize,
	},

	/// The controller was asked to create a value and produced none.
	#[error("controller for cache `{cache}` produced no value for key {key}")]
	ControllerContractViolation {
		cache: String,
		key: String,
	},
}

/// Result alias used across the crate.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
