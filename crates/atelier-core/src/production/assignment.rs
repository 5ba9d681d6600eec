//! Production queue and tailor assignment.
//!
//! Each order past `material-arranged` has one queue item. Assignment picks
//! a tailor with the required specialization and free capacity, holds a slot
//! with the capacity registry, and only then records the tailor on the item.
//! Whenever the item write fails after a slot was taken, the slot is handed
//! back before the error is returned. Taking an item away from its tailor
//! works the other way round: the slot is released first and the item keeps
//! its token until that release is confirmed.

use crate::capacity::{reserved_as_of, TailorRegistry};
use crate::engine::event_bus::EventBus;
use crate::records::Records;
use crate::retry::{with_conflict_retry, RetryPolicy};
use crate::CoreError;
use atelier_config::SchedulingConfig;
use atelier_types::{
	business_day, queue_item_id_for, truncate_id, AtelierEvent, Order, Priority,
	ProductionEvent, ProductionQueueItem, QueueHistoryEntry, QueueStatus, ReservationToken,
	StorageKey, Tailor, Versioned,
};
use chrono::{Duration, NaiveDate, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::instrument;

/// Returns true if the shop floor may move an item from `from` to `to`.
pub fn is_valid_queue_transition(from: QueueStatus, to: QueueStatus) -> bool {
	use QueueStatus::*;

	matches!(
		(from, to),
		(Assigned, Cutting)
			| (Cutting, Stitching)
			| (Stitching, QualityCheck)
			| (QualityCheck, Ready)
			| (Ready, Dispatched)
			| (QualityCheck, Stitching)
	)
}

/// Orders candidates for an item.
///
/// Rush work goes to the least loaded tailor so it starts soonest; normal
/// work goes to the best performer. Ties fall back to the tailor id.
fn rank_candidates(candidates: &mut [Tailor], priority: Priority, today: NaiveDate) {
	candidates.sort_by(|a, b| {
		let primary = match priority {
			Priority::Rush => reserved_as_of(a, today).cmp(&reserved_as_of(b, today)),
			Priority::Normal => b.performance_score.total_cmp(&a.performance_score),
		};
		match primary {
			Ordering::Equal => a.id.cmp(&b.id),
			other => other,
		}
	});
}

/// Outcome of one backlog sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
	/// Pending items found.
	pub examined: usize,
	pub assigned: usize,
	/// Items left pending because no tailor had room.
	pub still_pending: usize,
	/// Items dropped because their order was cancelled meanwhile.
	pub cancelled: usize,
	/// Items that hit any other error. They stay pending too.
	pub failed: usize,
}

/// Creates queue items and moves them across the shop floor.
pub struct AssignmentEngine {
	records: Records,
	tailors: Arc<TailorRegistry>,
	event_bus: EventBus,
	conflicts: RetryPolicy,
	scheduling: SchedulingConfig,
}

impl AssignmentEngine {
	pub fn new(
		records: Records,
		tailors: Arc<TailorRegistry>,
		event_bus: EventBus,
		scheduling: SchedulingConfig,
	) -> Self {
		Self {
			records,
			tailors,
			event_bus,
			conflicts: RetryPolicy::conflicts(&scheduling),
			scheduling,
		}
	}

	pub async fn get(&self, queue_item_id: &str) -> Result<ProductionQueueItem, CoreError> {
		Ok(self
			.records
			.get::<ProductionQueueItem>(StorageKey::QueueItems, queue_item_id)
			.await?
			.into_inner())
	}

	/// The queue item for an order, if one was created.
	pub async fn find_for_order(
		&self,
		order_id: &str,
	) -> Result<Option<ProductionQueueItem>, CoreError> {
		Ok(self
			.records
			.find::<ProductionQueueItem>(StorageKey::QueueItems, &queue_item_id_for(order_id))
			.await?
			.map(Versioned::into_inner))
	}

	/// Returns the order's queue item, creating it in `pending` if missing.
	#[instrument(skip_all, fields(order_id = %truncate_id(&order.id)))]
	pub async fn ensure_queue_item(&self, order: &Order) -> Result<ProductionQueueItem, CoreError> {
		if let Some(existing) = self.find_for_order(&order.id).await? {
			return Ok(existing);
		}

		let now = Utc::now();
		let item = ProductionQueueItem {
			id: order.queue_item_id(),
			order_id: order.id.clone(),
			status: QueueStatus::Pending,
			priority: if order.is_rush_order {
				Priority::Rush
			} else {
				Priority::Normal
			},
			required_specialization: order.required_specialization,
			assigned_tailor_id: None,
			reservation: None,
			created_at: now,
			assigned_at: None,
			expected_completion_at: None,
			history: vec![QueueHistoryEntry {
				status: QueueStatus::Pending,
				at: now,
				tailor_id: None,
				note: None,
			}],
		};

		match self
			.records
			.insert(StorageKey::QueueItems, &item.id, &item)
			.await
		{
			Ok(_) => {
				self.event_bus
					.publish(AtelierEvent::Production(ProductionEvent::QueueItemCreated {
						queue_item_id: item.id.clone(),
						order_id: item.order_id.clone(),
					}));
				tracing::info!(queue_item_id = %item.id, priority = ?item.priority, "Queued for production");
				Ok(item)
			},
			// Another request created it first
			Err(CoreError::AlreadyExists(_)) => self.get(&item.id).await,
			Err(e) => Err(e),
		}
	}

	/// Assigns a pending item to the best tailor with room today.
	pub async fn assign(&self, queue_item_id: &str) -> Result<ProductionQueueItem, CoreError> {
		self.assign_excluding(queue_item_id, None).await
	}

	/// Like `assign`, but never picks `excluded`.
	#[instrument(skip_all, fields(queue_item_id = %truncate_id(queue_item_id)))]
	pub async fn assign_excluding(
		&self,
		queue_item_id: &str,
		excluded: Option<&str>,
	) -> Result<ProductionQueueItem, CoreError> {
		let Versioned {
			version,
			data: mut item,
		} = self
			.records
			.get::<ProductionQueueItem>(StorageKey::QueueItems, queue_item_id)
			.await?;

		if item.status != QueueStatus::Pending {
			if item.assigned_tailor_id.is_some() {
				return Ok(item);
			}
			return Err(CoreError::InvalidQueueTransition {
				from: item.status,
				to: QueueStatus::Assigned,
			});
		}
		if self.order_closed(&item.order_id).await? {
			let item = self.cancel(queue_item_id, Some("order closed")).await?;
			return Err(CoreError::InvalidQueueTransition {
				from: item.status,
				to: QueueStatus::Assigned,
			});
		}

		let now = Utc::now();
		let mut candidates: Vec<Tailor> = self
			.tailors
			.candidates(item.required_specialization)
			.await?
			.into_iter()
			.filter(|tailor| Some(tailor.id.as_str()) != excluded)
			.collect();
		rank_candidates(&mut candidates, item.priority, business_day(now));

		let Some(token) = self.reserve_first(&candidates, &item.id).await? else {
			let reason = format!(
				"no active {} tailor has capacity left today",
				item.required_specialization
			);
			self.event_bus
				.publish(AtelierEvent::Production(ProductionEvent::Backlogged {
					queue_item_id: item.id.clone(),
					reason: reason.clone(),
				}));
			tracing::info!(candidates = candidates.len(), "Backlogged");
			return Err(CoreError::NoCapacityAvailable(reason));
		};

		let turnaround = if item.is_rush() {
			self.scheduling.rush_turnaround_days
		} else {
			self.scheduling.standard_turnaround_days
		};
		let expected_completion_at = now + Duration::days(i64::from(turnaround));
		item.assigned_tailor_id = Some(token.tailor_id.clone());
		item.reservation = Some(token.clone());
		item.assigned_at = Some(now);
		item.expected_completion_at = Some(expected_completion_at);
		item.record(QueueStatus::Assigned, now, None);

		if let Err(e) = self
			.records
			.update(StorageKey::QueueItems, queue_item_id, &item, version)
			.await
		{
			self.release_quietly(&token).await;
			return Err(e);
		}

		self.event_bus
			.publish(AtelierEvent::Production(ProductionEvent::Assigned {
				queue_item_id: item.id.clone(),
				tailor_id: token.tailor_id.clone(),
				expected_completion_at,
			}));
		tracing::info!(tailor_id = %token.tailor_id, "Assigned");
		Ok(item)
	}

	/// Tries each candidate in turn and returns the first slot granted.
	async fn reserve_first(
		&self,
		candidates: &[Tailor],
		holder: &str,
	) -> Result<Option<ReservationToken>, CoreError> {
		for tailor in candidates {
			match self.tailors.reserve(&tailor.id, holder).await {
				Ok(token) => return Ok(Some(token)),
				Err(CoreError::NoCapacityAvailable(_)) => continue,
				Err(e @ CoreError::ConcurrentModification(_)) | Err(e @ CoreError::NotFound(_)) => {
					tracing::debug!(tailor_id = %tailor.id, error = %e, "Skipping candidate");
					continue;
				},
				Err(e) => return Err(e),
			}
		}
		Ok(None)
	}

	/// Returns true if the item's order was cancelled or refunded. Items whose
	/// order record is missing are treated as open.
	async fn order_closed(&self, order_id: &str) -> Result<bool, CoreError> {
		Ok(self
			.records
			.find::<Order>(StorageKey::Orders, order_id)
			.await?
			.is_some_and(|order| order.data.status.is_closed()))
	}

	/// Releases a token, logging rather than failing. A slot that cannot be
	/// released is reclaimed by the next daily reset.
	async fn release_quietly(&self, token: &ReservationToken) {
		if let Err(e) = self.tailors.release(token).await {
			tracing::warn!(
				tailor_id = %token.tailor_id,
				holder = %truncate_id(&token.holder),
				error = %e,
				"Failed to release reservation"
			);
		}
	}

	/// Moves an item along the shop floor.
	#[instrument(skip_all, fields(queue_item_id = %truncate_id(queue_item_id), to = %new_status))]
	pub async fn advance_queue_status(
		&self,
		queue_item_id: &str,
		new_status: QueueStatus,
	) -> Result<ProductionQueueItem, CoreError> {
		self.move_item(queue_item_id, new_status, None, is_valid_queue_transition)
			.await
	}

	/// Sends an item back to stitching after the order failed quality check.
	///
	/// Items still at or before stitching are left alone.
	#[instrument(skip_all, fields(queue_item_id = %truncate_id(queue_item_id)))]
	pub async fn rework(&self, queue_item_id: &str) -> Result<ProductionQueueItem, CoreError> {
		let item = self.get(queue_item_id).await?;
		if matches!(
			item.status,
			QueueStatus::Assigned | QueueStatus::Cutting | QueueStatus::Stitching
		) {
			return Ok(item);
		}
		self.move_item(
			queue_item_id,
			QueueStatus::Stitching,
			Some("rework"),
			|from, _| matches!(from, QueueStatus::QualityCheck | QueueStatus::Ready),
		)
		.await
	}

	/// Marks a ready item as handed to the courier.
	pub async fn mark_dispatched(&self, queue_item_id: &str) -> Result<ProductionQueueItem, CoreError> {
		self.advance_queue_status(queue_item_id, QueueStatus::Dispatched)
			.await
	}

	async fn move_item<P>(
		&self,
		queue_item_id: &str,
		to: QueueStatus,
		note: Option<&str>,
		allowed: P,
	) -> Result<ProductionQueueItem, CoreError>
	where
		P: Fn(QueueStatus, QueueStatus) -> bool,
	{
		let allowed = &allowed;
		let (item, from) = with_conflict_retry(&self.conflicts, move || async move {
			let Versioned {
				version,
				data: mut item,
			} = self
				.records
				.get::<ProductionQueueItem>(StorageKey::QueueItems, queue_item_id)
				.await?;
			let from = item.status;

			if from == to {
				return Ok((item, None));
			}
			if !allowed(from, to) {
				return Err(CoreError::InvalidQueueTransition { from, to });
			}

			item.record(to, Utc::now(), note.map(str::to_string));
			self.records
				.update(StorageKey::QueueItems, queue_item_id, &item, version)
				.await?;
			Ok((item, Some(from)))
		})
		.await?;

		if let Some(from) = from {
			self.event_bus
				.publish(AtelierEvent::Production(ProductionEvent::StatusAdvanced {
					queue_item_id: item.id.clone(),
					from,
					to,
				}));
			tracing::info!(%from, "Queue item advanced");
		}
		Ok(item)
	}

	/// Takes an item away from its tailor and assigns it to someone else.
	///
	/// The slot is released before the item goes back to `pending`. If either
	/// step fails the error is returned and the item still names its tailor
	/// and token, so repeating the request finishes the job.
	#[instrument(skip_all, fields(queue_item_id = %truncate_id(queue_item_id)))]
	pub async fn reassign(
		&self,
		queue_item_id: &str,
		reason: &str,
	) -> Result<ProductionQueueItem, CoreError> {
		let (previous_tailor, changed) = with_conflict_retry(&self.conflicts, move || {
			self.try_unassign(queue_item_id, reason)
		})
		.await?;

		if changed {
			self.event_bus
				.publish(AtelierEvent::Production(ProductionEvent::Reassigned {
					queue_item_id: queue_item_id.to_string(),
					previous_tailor_id: previous_tailor.clone(),
					reason: reason.to_string(),
				}));
			tracing::info!(previous_tailor = ?previous_tailor, reason, "Unassigned for reassignment");
		}

		self.assign_excluding(queue_item_id, previous_tailor.as_deref())
			.await
	}

	async fn try_unassign(
		&self,
		queue_item_id: &str,
		reason: &str,
	) -> Result<(Option<String>, bool), CoreError> {
		let Versioned {
			version,
			data: mut item,
		} = self
			.records
			.get::<ProductionQueueItem>(StorageKey::QueueItems, queue_item_id)
			.await?;

		if item.status == QueueStatus::Pending {
			return Ok((None, false));
		}
		if !item.status.is_in_production() {
			return Err(CoreError::InvalidQueueTransition {
				from: item.status,
				to: QueueStatus::Pending,
			});
		}

		if let Some(token) = &item.reservation {
			self.tailors.release(token).await?;
		}
		let previous_tailor = item.assigned_tailor_id.take();
		item.reservation = None;
		item.assigned_at = None;
		item.expected_completion_at = None;
		item.record(QueueStatus::Pending, Utc::now(), Some(reason.to_string()));

		self.records
			.update(StorageKey::QueueItems, queue_item_id, &item, version)
			.await?;
		Ok((previous_tailor, true))
	}

	/// Cancels an item and gives its slot back. Cancelling twice is a no-op.
	///
	/// The item only becomes `cancelled` after its slot was released; a
	/// failed release is returned and the next cancel tries again.
	#[instrument(skip_all, fields(queue_item_id = %truncate_id(queue_item_id)))]
	pub async fn cancel(
		&self,
		queue_item_id: &str,
		reason: Option<&str>,
	) -> Result<ProductionQueueItem, CoreError> {
		let (item, changed) = with_conflict_retry(&self.conflicts, move || {
			self.try_cancel(queue_item_id, reason)
		})
		.await?;

		if changed {
			self.event_bus
				.publish(AtelierEvent::Production(ProductionEvent::Cancelled {
					queue_item_id: item.id.clone(),
				}));
			tracing::info!("Queue item cancelled");
		}
		Ok(item)
	}

	async fn try_cancel(
		&self,
		queue_item_id: &str,
		reason: Option<&str>,
	) -> Result<(ProductionQueueItem, bool), CoreError> {
		let Versioned {
			version,
			data: mut item,
		} = self
			.records
			.get::<ProductionQueueItem>(StorageKey::QueueItems, queue_item_id)
			.await?;

		match item.status {
			QueueStatus::Cancelled => return Ok((item, false)),
			QueueStatus::Dispatched => {
				return Err(CoreError::InvalidQueueTransition {
					from: QueueStatus::Dispatched,
					to: QueueStatus::Cancelled,
				})
			},
			_ => {},
		}

		if let Some(token) = &item.reservation {
			self.tailors.release(token).await?;
		}
		item.reservation = None;
		item.assigned_tailor_id = None;
		item.record(QueueStatus::Cancelled, Utc::now(), reason.map(str::to_string));

		self.records
			.update(StorageKey::QueueItems, queue_item_id, &item, version)
			.await?;
		Ok((item, true))
	}

	/// Retries every pending item, rush first, then oldest first.
	pub async fn sweep_backlog(&self) -> Result<SweepReport, CoreError> {
		let mut pending: Vec<ProductionQueueItem> = self
			.records
			.list::<ProductionQueueItem>(StorageKey::QueueItems)
			.await?
			.into_iter()
			.map(Versioned::into_inner)
			.filter(|item| item.status == QueueStatus::Pending)
			.collect();
		pending.sort_by(|a, b| {
			b.priority
				.cmp(&a.priority)
				.then_with(|| a.created_at.cmp(&b.created_at))
				.then_with(|| a.id.cmp(&b.id))
		});

		let mut report = SweepReport {
			examined: pending.len(),
			..SweepReport::default()
		};
		for item in &pending {
			match self.assign(&item.id).await {
				Ok(_) => report.assigned += 1,
				Err(CoreError::NoCapacityAvailable(_)) => report.still_pending += 1,
				Err(CoreError::InvalidQueueTransition {
					from: QueueStatus::Cancelled,
					..
				}) => report.cancelled += 1,
				Err(e) => {
					tracing::warn!(queue_item_id = %item.id, error = %e, "Backlog assignment failed");
					report.failed += 1;
				},
			}
		}

		if report.examined > 0 {
			tracing::info!(
				examined = report.examined,
				assigned = report.assigned,
				still_pending = report.still_pending,
				cancelled = report.cancelled,
				failed = report.failed,
				"Backlog sweep complete"
			);
		}
		Ok(report)
	}
}
