//! Ties order transitions to the production queue.
//!
//! An order may only move into a production status once the shop floor has
//! caught up, and some order moves have queue consequences (queueing,
//! cancelling, rework, dispatch). The coordinator runs the gate, commits the
//! order transition, publishes it, and then applies those consequences.

use crate::engine::event_bus::EventBus;
use crate::production::AssignmentEngine;
use crate::retry::{with_conflict_retry, RetryPolicy};
use crate::state::{is_valid_transition, OrderStateMachine, TransitionOutcome};
use crate::CoreError;
use atelier_types::{
	truncate_id, Actor, AtelierEvent, Order, OrderEvent, OrderStatus, QueueStatus,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Queue status an order's item must have reached before the order may enter
/// `target`.
pub fn production_requirement(target: OrderStatus) -> Option<QueueStatus> {
	match target {
		OrderStatus::InProgress => Some(QueueStatus::Assigned),
		OrderStatus::QualityCheck => Some(QueueStatus::Stitching),
		OrderStatus::ReadyDispatch => Some(QueueStatus::Ready),
		_ => None,
	}
}

pub struct SchedulingCoordinator {
	state_machine: Arc<OrderStateMachine>,
	assignment: Arc<AssignmentEngine>,
	event_bus: EventBus,
	conflicts: RetryPolicy,
}

impl SchedulingCoordinator {
	pub fn new(
		state_machine: Arc<OrderStateMachine>,
		assignment: Arc<AssignmentEngine>,
		event_bus: EventBus,
		conflicts: RetryPolicy,
	) -> Self {
		Self {
			state_machine,
			assignment,
			event_bus,
			conflicts,
		}
	}

	/// Moves an order to `target` and applies its production side effects.
	///
	/// Lost version races re-run the gate and the transition against fresh
	/// records. Side effects run whenever the order ends up in `target`, so
	/// repeating a request finishes work a previous attempt left undone. A
	/// side effect that still fails after its retries is returned; the order
	/// transition stays committed.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), to = %target))]
	pub async fn transition_order(
		&self,
		order_id: &str,
		target: OrderStatus,
		actor: &Actor,
		note: Option<&str>,
	) -> Result<Order, CoreError> {
		let outcome = with_conflict_retry(&self.conflicts, move || async move {
			let current = self.state_machine.get(order_id).await?;
			if current.status != target && is_valid_transition(current.status, target) {
				self.check_production_gate(order_id, target).await?;
			}
			self.state_machine
				.transition(order_id, target, actor, note)
				.await
		})
		.await?;

		if outcome.changed {
			let at = outcome
				.order
				.last_history_entry()
				.map(|entry| entry.at)
				.unwrap_or_else(Utc::now);
			self.event_bus
				.publish(AtelierEvent::Order(OrderEvent::StatusChanged {
					order_id: outcome.order.id.clone(),
					from: outcome.previous,
					to: target,
					actor: actor.clone(),
					note: note.map(str::to_string),
					at,
				}));
		}

		if let Err(e) = self.apply_side_effects(&outcome, note).await {
			tracing::error!(error = %e, "Production side effect failed");
			return Err(e);
		}
		Ok(outcome.order)
	}

	async fn check_production_gate(
		&self,
		order_id: &str,
		target: OrderStatus,
	) -> Result<(), CoreError> {
		let Some(required) = production_requirement(target) else {
			return Ok(());
		};
		let actual = self
			.assignment
			.find_for_order(order_id)
			.await?
			.map(|item| item.status);

		if actual.is_some_and(|status| status.reached(required)) {
			Ok(())
		} else {
			Err(CoreError::ProductionNotReady {
				order_id: order_id.to_string(),
				required,
				actual,
			})
		}
	}

	async fn apply_side_effects(
		&self,
		outcome: &TransitionOutcome,
		note: Option<&str>,
	) -> Result<(), CoreError> {
		let order = &outcome.order;
		let queue_item_id = order.queue_item_id();
		let queue_item_id = queue_item_id.as_str();

		match order.status {
			OrderStatus::MaterialArranged => {
				let item = with_conflict_retry(&self.conflicts, move || {
					self.assignment.ensure_queue_item(order)
				})
				.await?;
				let item_id = item.id.as_str();
				let assigned =
					with_conflict_retry(&self.conflicts, move || self.assignment.assign(item_id)).await;

				// A cancel committed after this transition may have missed the item
				if self.state_machine.get(&order.id).await?.status.is_closed() {
					self.assignment.cancel(item_id, Some("order closed")).await?;
					return Ok(());
				}
				match assigned {
					Ok(item) => {
						tracing::debug!(tailor_id = ?item.assigned_tailor_id, "Production scheduled")
					},
					Err(CoreError::NoCapacityAvailable(reason)) => {
						tracing::info!(%reason, "Waiting for tailor capacity")
					},
					Err(e) => return Err(e),
				}
			},
			OrderStatus::Cancelled | OrderStatus::Refunded => {
				match self.assignment.cancel(queue_item_id, note).await {
					Ok(_) | Err(CoreError::NotFound(_)) => {},
					Err(e) => return Err(e),
				}
			},
			OrderStatus::Dispatched => {
				self.assignment.mark_dispatched(queue_item_id).await?;
			},
			OrderStatus::InProgress
				if outcome.changed && outcome.previous == OrderStatus::QualityCheck =>
			{
				self.assignment.rework(queue_item_id).await?;
			},
			_ => {},
		}
		Ok(())
	}
}
