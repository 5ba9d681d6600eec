//! Event types for inter-service communication.
//!
//! Events flow through the engine's event bus after state has been committed.
//! Notification delivery (email, SMS, chat) subscribes to these events; the
//! core never waits on a subscriber and never retries a failed delivery.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Actor, OrderStatus, QueueStatus};

/// Main event type encompassing all atelier events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AtelierEvent {
	/// Events from the order state machine.
	Order(OrderEvent),
	/// Events from the production queue.
	Production(ProductionEvent),
	/// Events from the tailor capacity registry.
	Capacity(CapacityEvent),
}

/// Events related to orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	/// A new order was stored in `pending-payment`.
	Created {
		order_id: String,
		customer_id: String,
		total: Option<Decimal>,
	},
	/// A status transition was committed.
	StatusChanged {
		order_id: String,
		from: OrderStatus,
		to: OrderStatus,
		actor: Actor,
		note: Option<String>,
		at: DateTime<Utc>,
	},
}

/// Events related to the production queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProductionEvent {
	QueueItemCreated {
		queue_item_id: String,
		order_id: String,
	},
	Assigned {
		queue_item_id: String,
		tailor_id: String,
		expected_completion_at: DateTime<Utc>,
	},
	/// No tailor had capacity. The item waits for the next sweep.
	Backlogged {
		queue_item_id: String,
		reason: String,
	},
	StatusAdvanced {
		queue_item_id: String,
		from: QueueStatus,
		to: QueueStatus,
	},
	Reassigned {
		queue_item_id: String,
		previous_tailor_id: Option<String>,
		reason: String,
	},
	Cancelled {
		queue_item_id: String,
	},
}

/// Events related to tailor capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CapacityEvent {
	Reserved {
		tailor_id: String,
		reserved_today: u32,
		max_orders_per_day: u32,
	},
	Released {
		tailor_id: String,
		reserved_today: u32,
	},
	Reset {
		tailor_id: String,
		business_day: NaiveDate,
	},
}
