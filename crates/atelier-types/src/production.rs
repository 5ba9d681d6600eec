//! Production queue types.
//!
//! A queue item is the shop-floor record for an order once its materials are
//! arranged. Its status vocabulary is deliberately finer than the order's:
//! the order statuses are the customer-facing contract, the queue statuses
//! are what the workshop reports.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{GarmentCategory, UnknownVariant};

/// Returns the queue item id for an order. Queue items are 1:1 with orders.
pub fn queue_item_id_for(order_id: &str) -> String {
	format!("pq-{}", order_id)
}

/// Shop-floor tracking record for one order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductionQueueItem {
	pub id: String,
	pub order_id: String,
	pub status: QueueStatus,
	pub priority: Priority,
	pub required_specialization: GarmentCategory,
	/// Tailor currently producing the order. Set only while `reservation` is.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub assigned_tailor_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reservation: Option<ReservationToken>,
	pub created_at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub assigned_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub expected_completion_at: Option<DateTime<Utc>>,
	pub history: Vec<QueueHistoryEntry>,
}

impl ProductionQueueItem {
	/// Appends a history entry and moves the item to `status`.
	pub fn record(&mut self, status: QueueStatus, at: DateTime<Utc>, note: Option<String>) {
		self.status = status;
		self.history.push(QueueHistoryEntry {
			status,
			at,
			tailor_id: self.assigned_tailor_id.clone(),
			note,
		});
	}

	pub fn is_rush(&self) -> bool {
		self.priority == Priority::Rush
	}
}

/// One queue status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueHistoryEntry {
	pub status: QueueStatus,
	pub at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tailor_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
}

/// Scheduling priority of a queue item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
	Normal,
	Rush,
}

/// Shop-floor status of a queue item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum QueueStatus {
	Pending,
	Assigned,
	Cutting,
	Stitching,
	QualityCheck,
	Ready,
	Dispatched,
	Cancelled,
}

impl QueueStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			QueueStatus::Pending => "pending",
			QueueStatus::Assigned => "assigned",
			QueueStatus::Cutting => "cutting",
			QueueStatus::Stitching => "stitching",
			QueueStatus::QualityCheck => "quality-check",
			QueueStatus::Ready => "ready",
			QueueStatus::Dispatched => "dispatched",
			QueueStatus::Cancelled => "cancelled",
		}
	}

	/// Position along the production line, used to compare progress.
	/// `Cancelled` has no position.
	pub fn rank(&self) -> Option<u8> {
		match self {
			QueueStatus::Pending => Some(0),
			QueueStatus::Assigned => Some(1),
			QueueStatus::Cutting => Some(2),
			QueueStatus::Stitching => Some(3),
			QueueStatus::QualityCheck => Some(4),
			QueueStatus::Ready => Some(5),
			QueueStatus::Dispatched => Some(6),
			QueueStatus::Cancelled => None,
		}
	}

	/// Returns true if this status is at or past `other` on the production line.
	pub fn reached(&self, other: QueueStatus) -> bool {
		match (self.rank(), other.rank()) {
			(Some(a), Some(b)) => a >= b,
			_ => false,
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, QueueStatus::Dispatched | QueueStatus::Cancelled)
	}

	/// True while a tailor holds the item.
	pub fn is_in_production(&self) -> bool {
		matches!(
			self,
			QueueStatus::Assigned
				| QueueStatus::Cutting
				| QueueStatus::Stitching
				| QueueStatus::QualityCheck
				| QueueStatus::Ready
		)
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Pending,
			Self::Assigned,
			Self::Cutting,
			Self::Stitching,
			Self::QualityCheck,
			Self::Ready,
			Self::Dispatched,
			Self::Cancelled,
		]
		.into_iter()
	}
}

impl fmt::Display for QueueStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for QueueStatus {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all()
			.find(|status| status.as_str() == s)
			.ok_or_else(|| UnknownVariant::new("queue status", s))
	}
}

/// Proof of a held slot in a tailor's daily capacity.
///
/// A token is bound to the business day it was taken on; once the tailor's
/// capacity is reset for a later day, releasing it is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ReservationToken {
	pub id: String,
	pub tailor_id: String,
	pub business_day: NaiveDate,
	/// Queue item the slot was reserved for.
	pub holder: String,
}
