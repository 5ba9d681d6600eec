//! Storage-related types for the atelier system.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Storage keys for different data collections.
///
/// This enum provides type safety for storage operations by replacing
/// string literals with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Key for storing order data
	Orders,
	/// Key for storing production queue items
	QueueItems,
	/// Key for storing tailor records and their capacity
	Tailors,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::QueueItems => "queue_items",
			StorageKey::Tailors => "tailors",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Orders, Self::QueueItems, Self::Tailors].into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orders" => Ok(Self::Orders),
			"queue_items" => Ok(Self::QueueItems),
			"tailors" => Ok(Self::Tailors),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}

/// A stored record together with the version it was read at.
///
/// Versions start at 1 on insert and grow by one on every conditional write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Versioned<T> {
	pub version: u64,
	pub data: T,
}

impl<T> Versioned<T> {
	pub fn new(version: u64, data: T) -> Self {
		Self { version, data }
	}

	pub fn into_inner(self) -> T {
		self.data
	}
}
