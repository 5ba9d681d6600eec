//! Order state machine implementation.
//!
//! Orders move through a fixed lifecycle:
//! pending-payment -> payment-verified -> material-arranged -> in-progress ->
//! quality-check -> ready-dispatch -> dispatched -> delivered, with
//! cancellation allowed before production starts and a refund after it.
//! The transition table below is the only place edges are defined.

use crate::records::Records;
use crate::CoreError;
use atelier_types::{
	truncate_id, Actor, ActorRole, ClosureRecord, Order, OrderStatus, StatusHistoryEntry,
	StorageKey, Versioned,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use tracing::instrument;

/// Static transition table. Each status maps to its allowed next statuses.
static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
	use OrderStatus::*;

	let mut m = HashMap::new();
	m.insert(PendingPayment, HashSet::from([PaymentVerified, Cancelled]));
	m.insert(PaymentVerified, HashSet::from([MaterialArranged, Cancelled]));
	m.insert(MaterialArranged, HashSet::from([InProgress, Cancelled]));
	m.insert(InProgress, HashSet::from([QualityCheck]));
	m.insert(QualityCheck, HashSet::from([ReadyDispatch, InProgress]));
	m.insert(ReadyDispatch, HashSet::from([Dispatched]));
	m.insert(Dispatched, HashSet::from([Delivered]));
	m.insert(Cancelled, HashSet::from([Refunded]));
	m.insert(Delivered, HashSet::new());
	m.insert(Refunded, HashSet::new());
	m
});

/// Returns true if the table has an edge from `from` to `to`.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
	TRANSITIONS
		.get(&from)
		.is_some_and(|allowed| allowed.contains(&to))
}

/// The quality-check rejection loop. Only admins may take it.
pub fn is_rework(from: OrderStatus, to: OrderStatus) -> bool {
	from == OrderStatus::QualityCheck && to == OrderStatus::InProgress
}

/// Result of a transition request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
	/// The order as stored after the request.
	pub order: Order,
	/// Status the order had when the request was validated.
	pub previous: OrderStatus,
	/// False when the order was already in the target status.
	pub changed: bool,
}

/// Manages order state transitions and persistence.
pub struct OrderStateMachine {
	records: Records,
}

impl OrderStateMachine {
	pub fn new(records: Records) -> Self {
		Self { records }
	}

	/// Stores a new order. Fails with `AlreadyExists` if the id is taken.
	pub async fn create(&self, order: &Order) -> Result<(), CoreError> {
		self.records
			.insert(StorageKey::Orders, &order.id, order)
			.await?;
		Ok(())
	}

	pub async fn get(&self, order_id: &str) -> Result<Order, CoreError> {
		Ok(self
			.records
			.get::<Order>(StorageKey::Orders, order_id)
			.await?
			.into_inner())
	}

	/// Moves an order to `target`.
	///
	/// The write is conditional on the version that was validated, so a
	/// concurrent change surfaces as `ConcurrentModification` and the caller
	/// re-runs validation against the fresh record.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), to = %target))]
	pub async fn transition(
		&self,
		order_id: &str,
		target: OrderStatus,
		actor: &Actor,
		note: Option<&str>,
	) -> Result<TransitionOutcome, CoreError> {
		let Versioned {
			version,
			data: mut order,
		} = self.records.get::<Order>(StorageKey::Orders, order_id).await?;
		let previous = order.status;

		if previous == target {
			return Ok(TransitionOutcome {
				order,
				previous,
				changed: false,
			});
		}
		if !is_valid_transition(previous, target) {
			return Err(CoreError::InvalidTransition {
				from: previous,
				to: target,
			});
		}
		if is_rework(previous, target) && actor.role != ActorRole::Admin {
			return Err(CoreError::Forbidden {
				actor: actor.to_string(),
				from: previous,
				to: target,
			});
		}

		let now = Utc::now();
		let note = note.map(str::to_string);
		order.status = target;
		order.status_history.push(StatusHistoryEntry {
			status: target,
			at: now,
			actor: actor.clone(),
			note: note.clone(),
		});
		let closure = ClosureRecord {
			at: now,
			actor: actor.clone(),
			reason: note,
		};
		match target {
			OrderStatus::Cancelled => order.cancellation = Some(closure),
			OrderStatus::Refunded => order.refund = Some(closure),
			_ => {},
		}
		order.updated_at = now;

		self.records
			.update(StorageKey::Orders, order_id, &order, version)
			.await?;
		tracing::info!(from = %previous, actor = %actor, "Order transitioned");

		Ok(TransitionOutcome {
			order,
			previous,
			changed: true,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::retry::RetryPolicy;
	use atelier_storage::{implementations::memory::MemoryStorage, StorageService};
	use atelier_types::GarmentCategory;
	use std::sync::Arc;
	use std::time::Duration;

	fn machine() -> OrderStateMachine {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let retry = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2));
		OrderStateMachine::new(Records::new(storage, retry))
	}

	fn order(id: &str, status: OrderStatus) -> Order {
		let now = Utc::now();
		Order {
			id: id.to_string(),
			customer_id: "c-1".into(),
			line_items: Vec::new(),
			custom_config: None,
			price: None,
			is_rush_order: false,
			required_specialization: GarmentCategory::Shirt,
			status,
			status_history: vec![StatusHistoryEntry {
				status,
				at: now,
				actor: Actor::customer("c-1"),
				note: None,
			}],
			cancellation: None,
			refund: None,
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn test_table_covers_every_status() {
		for status in OrderStatus::all() {
			assert!(TRANSITIONS.contains_key(&status), "{} missing", status);
		}
		assert!(is_valid_transition(OrderStatus::PendingPayment, OrderStatus::PaymentVerified));
		assert!(!is_valid_transition(OrderStatus::PendingPayment, OrderStatus::InProgress));
		assert!(!is_valid_transition(OrderStatus::InProgress, OrderStatus::Cancelled));
		assert!(!is_valid_transition(OrderStatus::Delivered, OrderStatus::Refunded));
	}

	#[tokio::test]
	async fn test_every_pair_follows_the_table() {
		let machine = machine();
		let admin = Actor::admin("a-1");

		for from in OrderStatus::all() {
			for to in OrderStatus::all() {
				let id = format!("{}-{}", from, to);
				machine.create(&order(&id, from)).await.unwrap();
				let result = machine.transition(&id, to, &admin, None).await;

				if from == to {
					assert!(!result.unwrap().changed);
				} else if is_valid_transition(from, to) {
					let outcome = result.unwrap();
					assert!(outcome.changed);
					assert_eq!(outcome.previous, from);
					assert_eq!(machine.get(&id).await.unwrap().status, to);
				} else {
					assert_eq!(result, Err(CoreError::InvalidTransition { from, to }));
					assert_eq!(machine.get(&id).await.unwrap().status, from);
				}
			}
		}
	}

	#[tokio::test]
	async fn test_same_status_adds_no_history() {
		let machine = machine();
		machine.create(&order("o-1", OrderStatus::PaymentVerified)).await.unwrap();

		let outcome = machine
			.transition("o-1", OrderStatus::PaymentVerified, &Actor::system(), None)
			.await
			.unwrap();
		assert!(!outcome.changed);
		assert_eq!(machine.get("o-1").await.unwrap().status_history.len(), 1);
	}

	#[tokio::test]
	async fn test_history_records_actor_and_note() {
		let machine = machine();
		machine.create(&order("o-1", OrderStatus::PendingPayment)).await.unwrap();

		let verifier = Actor::payment_verifier("v-9");
		machine
			.transition("o-1", OrderStatus::PaymentVerified, &verifier, Some("receipt #42"))
			.await
			.unwrap();

		let stored = machine.get("o-1").await.unwrap();
		let entry = stored.last_history_entry().unwrap();
		assert_eq!(entry.status, OrderStatus::PaymentVerified);
		assert_eq!(entry.actor, verifier);
		assert_eq!(entry.note.as_deref(), Some("receipt #42"));
		assert_eq!(stored.status_history.len(), 2);
	}

	#[tokio::test]
	async fn test_rework_requires_admin() {
		let machine = machine();
		machine.create(&order("o-1", OrderStatus::QualityCheck)).await.unwrap();

		let result = machine
			.transition("o-1", OrderStatus::InProgress, &Actor::customer("c-1"), None)
			.await;
		assert!(matches!(result, Err(CoreError::Forbidden { .. })));

		machine
			.transition("o-1", OrderStatus::InProgress, &Actor::admin("a-1"), Some("loose seam"))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_cancel_and_refund_record_closure() {
		let machine = machine();
		machine.create(&order("o-1", OrderStatus::PendingPayment)).await.unwrap();

		machine
			.transition("o-1", OrderStatus::Cancelled, &Actor::customer("c-1"), Some("changed mind"))
			.await
			.unwrap();
		machine
			.transition("o-1", OrderStatus::Refunded, &Actor::admin("a-1"), None)
			.await
			.unwrap();

		let stored = machine.get("o-1").await.unwrap();
		let cancellation = stored.cancellation.unwrap();
		assert_eq!(cancellation.actor, Actor::customer("c-1"));
		assert_eq!(cancellation.reason.as_deref(), Some("changed mind"));
		assert_eq!(stored.refund.unwrap().actor, Actor::admin("a-1"));
	}

	#[tokio::test]
	async fn test_unknown_order() {
		let machine = machine();
		let result = machine
			.transition("missing", OrderStatus::PaymentVerified, &Actor::system(), None)
			.await;
		assert!(matches!(result, Err(CoreError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_concurrent_transitions_have_one_winner() {
		let machine = Arc::new(machine());
		machine.create(&order("o-1", OrderStatus::PendingPayment)).await.unwrap();

		let verify = {
			let machine = machine.clone();
			tokio::spawn(async move {
				machine
					.transition("o-1", OrderStatus::PaymentVerified, &Actor::system(), None)
					.await
			})
		};
		let cancel = {
			let machine = machine.clone();
			tokio::spawn(async move {
				machine
					.transition("o-1", OrderStatus::Cancelled, &Actor::customer("c-1"), None)
					.await
			})
		};
		let results = [verify.await.unwrap(), cancel.await.unwrap()];

		let winners = results.iter().filter(|r| r.is_ok()).count();
		assert!(winners >= 1);
		let stored = machine.get("o-1").await.unwrap();
		// Exactly one new history entry per committed transition
		assert_eq!(stored.status_history.len(), 1 + winners);
		for result in results.iter().filter_map(|r| r.as_ref().err()) {
			assert!(matches!(
				result,
				CoreError::ConcurrentModification(_) | CoreError::InvalidTransition { .. }
			));
		}
	}
}
