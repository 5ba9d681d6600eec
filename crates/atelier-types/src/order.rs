//! Order types for the atelier production system.
//!
//! This module defines the order aggregate, its fixed status vocabulary and
//! the append-only status history that records every committed transition.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CustomOrderConfig, GarmentCategory, PriceBreakdown, UnknownVariant};

/// A customer purchase tracked through the production lifecycle.
///
/// Orders are never deleted. Terminal orders (`delivered`, `cancelled`,
/// `refunded`) are retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
	/// Unique identifier for this order.
	pub id: String,
	/// Customer who placed the order.
	pub customer_id: String,
	/// Catalog garments on the order.
	#[serde(default)]
	pub line_items: Vec<LineItem>,
	/// Custom tailoring configuration, present for made-to-order garments.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub custom_config: Option<CustomOrderConfig>,
	/// Price snapshot taken at creation. Never changed afterwards.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub price: Option<PriceBreakdown>,
	/// Whether the order was placed as a rush order.
	pub is_rush_order: bool,
	/// Garment category a tailor must specialise in to produce this order.
	pub required_specialization: GarmentCategory,
	/// Current status of the order.
	pub status: OrderStatus,
	/// Every committed status change, oldest first.
	pub status_history: Vec<StatusHistoryEntry>,
	/// Set when the order enters `cancelled`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cancellation: Option<ClosureRecord>,
	/// Set when the order enters `refunded`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub refund: Option<ClosureRecord>,
	/// Timestamp when this order was created.
	pub created_at: DateTime<Utc>,
	/// Timestamp when this order was last updated.
	pub updated_at: DateTime<Utc>,
}

impl Order {
	/// Returns the queue item id paired with this order.
	pub fn queue_item_id(&self) -> String {
		crate::queue_item_id_for(&self.id)
	}

	/// Returns the most recent history entry.
	pub fn last_history_entry(&self) -> Option<&StatusHistoryEntry> {
		self.status_history.last()
	}
}

/// A catalog garment on an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
	pub product_id: String,
	pub name: String,
	pub category: GarmentCategory,
	pub quantity: u32,
	pub unit_price: Decimal,
}

/// One committed status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusHistoryEntry {
	pub status: OrderStatus,
	pub at: DateTime<Utc>,
	pub actor: Actor,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
}

/// Who closed an order (cancellation or refund) and why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosureRecord {
	pub at: DateTime<Utc>,
	pub actor: Actor,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

/// The party that triggered a status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
	pub id: String,
	pub role: ActorRole,
}

impl Actor {
	pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
		Self {
			id: id.into(),
			role,
		}
	}

	pub fn customer(id: impl Into<String>) -> Self {
		Self::new(id, ActorRole::Customer)
	}

	pub fn admin(id: impl Into<String>) -> Self {
		Self::new(id, ActorRole::Admin)
	}

	pub fn payment_verifier(id: impl Into<String>) -> Self {
		Self::new(id, ActorRole::PaymentVerifier)
	}

	/// The engine itself, used for automated moves such as backlog sweeps.
	pub fn system() -> Self {
		Self::new("system", ActorRole::System)
	}
}

impl fmt::Display for Actor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.role, self.id)
	}
}

/// Role of an actor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ActorRole {
	Customer,
	Admin,
	PaymentVerifier,
	System,
}

impl fmt::Display for ActorRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ActorRole::Customer => write!(f, "customer"),
			ActorRole::Admin => write!(f, "admin"),
			ActorRole::PaymentVerifier => write!(f, "payment-verifier"),
			ActorRole::System => write!(f, "system"),
		}
	}
}

/// Status of an order in the production lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
	/// Order has been placed and awaits payment confirmation.
	PendingPayment,
	/// Payment receipt has been verified.
	PaymentVerified,
	/// Fabric and trims are ready; the order enters the production queue.
	MaterialArranged,
	/// A tailor is producing the garment.
	InProgress,
	/// Garment is being inspected.
	QualityCheck,
	/// Garment passed inspection and awaits pickup by the courier.
	ReadyDispatch,
	/// Garment has left the workshop.
	Dispatched,
	/// Garment has reached the customer.
	Delivered,
	/// Order was cancelled before production started.
	Cancelled,
	/// Payment for a cancelled order was refunded.
	Refunded,
}

impl OrderStatus {
	/// Returns the wire name of the status.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::PendingPayment => "pending-payment",
			OrderStatus::PaymentVerified => "payment-verified",
			OrderStatus::MaterialArranged => "material-arranged",
			OrderStatus::InProgress => "in-progress",
			OrderStatus::QualityCheck => "quality-check",
			OrderStatus::ReadyDispatch => "ready-dispatch",
			OrderStatus::Dispatched => "dispatched",
			OrderStatus::Delivered => "delivered",
			OrderStatus::Cancelled => "cancelled",
			OrderStatus::Refunded => "refunded",
		}
	}

	/// Returns true for statuses with no outgoing production moves.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
		)
	}

	/// Returns true once the order was cancelled, whether or not it was refunded.
	pub fn is_closed(&self) -> bool {
		matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
	}

	/// Returns an iterator over every status.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::PendingPayment,
			Self::PaymentVerified,
			Self::MaterialArranged,
			Self::InProgress,
			Self::QualityCheck,
			Self::ReadyDispatch,
			Self::Dispatched,
			Self::Delivered,
			Self::Cancelled,
			Self::Refunded,
		]
		.into_iter()
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all()
			.find(|status| status.as_str() == s)
			.ok_or_else(|| UnknownVariant::new("order status", s))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_names_round_trip() {
		for status in OrderStatus::all() {
			assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
			let json = serde_json::to_string(&status).unwrap();
			assert_eq!(json, format!("\"{}\"", status.as_str()));
		}
	}

	#[test]
	fn test_stale_status_names_rejected() {
		for stale in ["fabric-arranged", "out-for-delivery", "Delivered", ""] {
			let err = stale.parse::<OrderStatus>().unwrap_err();
			assert!(err.to_string().contains("order status"));
		}
	}

	#[test]
	fn test_terminal_statuses() {
		let terminal: Vec<_> = OrderStatus::all().filter(|s| s.is_terminal()).collect();
		assert_eq!(
			terminal,
			vec![
				OrderStatus::Delivered,
				OrderStatus::Cancelled,
				OrderStatus::Refunded
			]
		);
		assert!(OrderStatus::Refunded.is_closed());
		assert!(!OrderStatus::Delivered.is_closed());
	}
}
