//! Error taxonomy shared by every core component.

use atelier_pricing::PricingError;
use atelier_storage::StorageError;
use atelier_types::{OrderStatus, QueueStatus, StorageKey};
use thiserror::Error;

/// Errors returned by the core.
///
/// Callers branch on the variant: `ConcurrentModification` means re-run the
/// whole operation, `NoCapacityAvailable` is a backlog signal rather than a
/// customer-facing failure, and only `StoreUnavailable` is retried inside
/// the core.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
	#[error("Invalid transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Concurrent modification: {0}")]
	ConcurrentModification(String),
	#[error("No capacity available: {0}")]
	NoCapacityAvailable(String),
	#[error("Invalid configuration: {0}")]
	InvalidConfiguration(String),
	#[error("Store unavailable: {0}")]
	StoreUnavailable(String),
	#[error("Already exists: {0}")]
	AlreadyExists(String),
	#[error("{actor} may not move an order from {from} to {to}")]
	Forbidden {
		actor: String,
		from: OrderStatus,
		to: OrderStatus,
	},
	#[error(
		"Order {order_id} cannot move on until production reaches {required} (currently {})",
		queue_label(.actual)
	)]
	ProductionNotReady {
		order_id: String,
		required: QueueStatus,
		actual: Option<QueueStatus>,
	},
	#[error("Invalid queue transition from {from} to {to}")]
	InvalidQueueTransition { from: QueueStatus, to: QueueStatus },
	#[error("Corrupt record: {0}")]
	CorruptRecord(String),
}

fn queue_label(status: &Option<QueueStatus>) -> &'static str {
	status.map(|s| s.as_str()).unwrap_or("not queued")
}

impl CoreError {
	/// True for failures that may clear up if the same call is repeated.
	pub fn is_transient(&self) -> bool {
		matches!(self, CoreError::StoreUnavailable(_))
	}

	pub fn is_conflict(&self) -> bool {
		matches!(self, CoreError::ConcurrentModification(_))
	}

	/// Maps a storage failure on one record into the core taxonomy.
	pub(crate) fn from_storage(err: StorageError, key: StorageKey, id: &str) -> Self {
		let record = format!("{} {}", key.as_str(), id);
		match err {
			StorageError::NotFound => CoreError::NotFound(record),
			StorageError::AlreadyExists => CoreError::AlreadyExists(record),
			StorageError::VersionConflict { expected, actual } => CoreError::ConcurrentModification(
				format!("{} changed (expected version {}, found {})", record, expected, actual),
			),
			StorageError::Serialization(e) => CoreError::CorruptRecord(format!("{}: {}", record, e)),
			StorageError::Backend(e) => CoreError::StoreUnavailable(e),
			StorageError::Configuration(e) => CoreError::InvalidConfiguration(e),
		}
	}
}

impl From<PricingError> for CoreError {
	fn from(err: PricingError) -> Self {
		match err {
			PricingError::InvalidConfiguration(message) => CoreError::InvalidConfiguration(message),
		}
	}
}
