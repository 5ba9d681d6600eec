//! Tailor capacity registry.
//!
//! Tailors and their daily capacity live in the shared store. A reservation
//! is a conditional write that adds a token id to the tailor's `held` set for
//! the current business day, so `reserved_today` can never pass
//! `max_orders_per_day` however many instances reserve at once.

use crate::engine::event_bus::EventBus;
use crate::records::Records;
use crate::retry::{with_conflict_retry, RetryPolicy};
use crate::CoreError;
use atelier_types::{
	business_day, truncate_id, AtelierEvent, CapacityEvent, GarmentCategory, ReservationToken,
	StorageKey, Tailor, TailorCapacity, Versioned,
};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeSet;
use tracing::instrument;
use uuid::Uuid;

/// Input for registering a tailor.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTailor {
	/// Generated when absent.
	pub id: Option<String>,
	pub name: String,
	pub specializations: BTreeSet<GarmentCategory>,
	pub max_orders_per_day: u32,
	pub performance_score: f64,
}

/// Partial update of a tailor. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TailorUpdate {
	pub name: Option<String>,
	pub specializations: Option<BTreeSet<GarmentCategory>>,
	pub max_orders_per_day: Option<u32>,
	pub performance_score: Option<f64>,
	pub active: Option<bool>,
}

/// Moves a capacity record onto `today`, dropping yesterday's holds.
///
/// Returns true if the business day changed.
fn roll_over(capacity: &mut TailorCapacity, today: NaiveDate) -> bool {
	if today > capacity.business_day {
		capacity.business_day = today;
		capacity.held.clear();
		true
	} else {
		false
	}
}

/// Slots a tailor has reserved as of `today`.
pub(crate) fn reserved_as_of(tailor: &Tailor, today: NaiveDate) -> u32 {
	if today > tailor.capacity.business_day {
		0
	} else {
		tailor.capacity.reserved_today()
	}
}

fn check_score(score: f64) -> Result<(), CoreError> {
	if score.is_finite() && score >= 0.0 {
		Ok(())
	} else {
		Err(CoreError::InvalidConfiguration(format!(
			"performance_score must be a non-negative number, got {}",
			score
		)))
	}
}

/// Registry of tailors and their daily capacity.
pub struct TailorRegistry {
	records: Records,
	conflicts: RetryPolicy,
	event_bus: EventBus,
}

impl TailorRegistry {
	pub fn new(records: Records, conflicts: RetryPolicy, event_bus: EventBus) -> Self {
		Self {
			records,
			conflicts,
			event_bus,
		}
	}

	/// Registers a new tailor with an empty reservation set for today.
	#[instrument(skip_all, fields(name = %new.name))]
	pub async fn register(&self, new: NewTailor) -> Result<Tailor, CoreError> {
		if new.specializations.is_empty() {
			return Err(CoreError::InvalidConfiguration(
				"a tailor needs at least one specialization".into(),
			));
		}
		if new.max_orders_per_day == 0 {
			return Err(CoreError::InvalidConfiguration(
				"max_orders_per_day must be at least 1".into(),
			));
		}
		check_score(new.performance_score)?;

		let now = Utc::now();
		let tailor = Tailor {
			id: new.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
			name: new.name,
			specializations: new.specializations,
			capacity: TailorCapacity::new(new.max_orders_per_day, business_day(now)),
			performance_score: new.performance_score,
			active: true,
			created_at: now,
			updated_at: now,
		};

		self.records
			.insert(StorageKey::Tailors, &tailor.id, &tailor)
			.await?;
		tracing::info!(tailor_id = %tailor.id, max_orders_per_day = tailor.capacity.max_orders_per_day, "Registered tailor");
		Ok(tailor)
	}

	/// Applies a partial update.
	///
	/// Capacity may not drop below the reservations already held today.
	#[instrument(skip_all, fields(tailor_id = %truncate_id(tailor_id)))]
	pub async fn update(&self, tailor_id: &str, update: TailorUpdate) -> Result<Tailor, CoreError> {
		if let Some(score) = update.performance_score {
			check_score(score)?;
		}
		if matches!(&update.specializations, Some(s) if s.is_empty()) {
			return Err(CoreError::InvalidConfiguration(
				"a tailor needs at least one specialization".into(),
			));
		}

		let update = &update;
		with_conflict_retry(&self.conflicts, move || async move {
			let Versioned {
				version,
				data: mut tailor,
			} = self.records.get::<Tailor>(StorageKey::Tailors, tailor_id).await?;

			roll_over(&mut tailor.capacity, business_day(Utc::now()));
			if let Some(max) = update.max_orders_per_day {
				if max == 0 || max < tailor.capacity.reserved_today() {
					return Err(CoreError::InvalidConfiguration(format!(
						"max_orders_per_day {} is below the {} slots already reserved today",
						max,
						tailor.capacity.reserved_today()
					)));
				}
				tailor.capacity.max_orders_per_day = max;
			}
			if let Some(name) = &update.name {
				tailor.name = name.clone();
			}
			if let Some(specializations) = &update.specializations {
				tailor.specializations = specializations.clone();
			}
			if let Some(score) = update.performance_score {
				tailor.performance_score = score;
			}
			if let Some(active) = update.active {
				tailor.active = active;
			}
			tailor.updated_at = Utc::now();

			self.records
				.update(StorageKey::Tailors, tailor_id, &tailor, version)
				.await?;
			Ok(tailor)
		})
		.await
	}

	pub async fn get(&self, tailor_id: &str) -> Result<Tailor, CoreError> {
		Ok(self
			.records
			.get::<Tailor>(StorageKey::Tailors, tailor_id)
			.await?
			.into_inner())
	}

	pub async fn exists(&self, tailor_id: &str) -> Result<bool, CoreError> {
		self.records.exists(StorageKey::Tailors, tailor_id).await
	}

	/// Every tailor, ordered by id.
	pub async fn list(&self) -> Result<Vec<Tailor>, CoreError> {
		let mut tailors: Vec<Tailor> = self
			.records
			.list::<Tailor>(StorageKey::Tailors)
			.await?
			.into_iter()
			.map(Versioned::into_inner)
			.collect();
		tailors.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(tailors)
	}

	/// Active tailors able to produce `specialization`, ordered by id.
	pub async fn candidates(
		&self,
		specialization: GarmentCategory,
	) -> Result<Vec<Tailor>, CoreError> {
		Ok(self
			.list()
			.await?
			.into_iter()
			.filter(|tailor| tailor.can_produce(specialization))
			.collect())
	}

	/// Takes one slot of the tailor's capacity for today.
	///
	/// Lost version races are retried with backoff; if every attempt loses,
	/// the result is `ConcurrentModification`.
	#[instrument(skip_all, fields(tailor_id = %truncate_id(tailor_id)))]
	pub async fn reserve(&self, tailor_id: &str, holder: &str) -> Result<ReservationToken, CoreError> {
		with_conflict_retry(&self.conflicts, move || self.try_reserve(tailor_id, holder)).await
	}

	async fn try_reserve(&self, tailor_id: &str, holder: &str) -> Result<ReservationToken, CoreError> {
		let Versioned {
			version,
			data: mut tailor,
		} = self.records.get::<Tailor>(StorageKey::Tailors, tailor_id).await?;

		if !tailor.active {
			return Err(CoreError::NoCapacityAvailable(format!(
				"tailor {} is inactive",
				tailor_id
			)));
		}

		let now = Utc::now();
		let rolled = roll_over(&mut tailor.capacity, business_day(now));
		if !tailor.capacity.has_room() {
			return Err(CoreError::NoCapacityAvailable(format!(
				"tailor {} is at {}/{} for {}",
				tailor_id,
				tailor.capacity.reserved_today(),
				tailor.capacity.max_orders_per_day,
				tailor.capacity.business_day
			)));
		}

		let token = ReservationToken {
			id: Uuid::new_v4().to_string(),
			tailor_id: tailor.id.clone(),
			business_day: tailor.capacity.business_day,
			holder: holder.to_string(),
		};
		tailor.capacity.held.insert(token.id.clone());
		tailor.updated_at = now;

		self.records
			.update(StorageKey::Tailors, tailor_id, &tailor, version)
			.await?;

		if rolled {
			self.event_bus
				.publish(AtelierEvent::Capacity(CapacityEvent::Reset {
					tailor_id: tailor.id.clone(),
					business_day: tailor.capacity.business_day,
				}));
		}
		self.event_bus
			.publish(AtelierEvent::Capacity(CapacityEvent::Reserved {
				tailor_id: tailor.id.clone(),
				reserved_today: tailor.capacity.reserved_today(),
				max_orders_per_day: tailor.capacity.max_orders_per_day,
			}));
		tracing::debug!(
			holder = %truncate_id(holder),
			reserved_today = tailor.capacity.reserved_today(),
			max_orders_per_day = tailor.capacity.max_orders_per_day,
			"Reserved capacity"
		);
		Ok(token)
	}

	/// Gives a reservation back.
	///
	/// Returns false without touching the store when the token is unknown,
	/// already released, or from an earlier business day.
	#[instrument(skip_all, fields(tailor_id = %truncate_id(&token.tailor_id)))]
	pub async fn release(&self, token: &ReservationToken) -> Result<bool, CoreError> {
		with_conflict_retry(&self.conflicts, move || self.try_release(token)).await
	}

	async fn try_release(&self, token: &ReservationToken) -> Result<bool, CoreError> {
		let Some(Versioned {
			version,
			data: mut tailor,
		}) = self
			.records
			.find::<Tailor>(StorageKey::Tailors, &token.tailor_id)
			.await?
		else {
			return Ok(false);
		};

		if tailor.capacity.business_day != token.business_day
			|| !tailor.capacity.held.remove(&token.id)
		{
			return Ok(false);
		}
		tailor.updated_at = Utc::now();

		self.records
			.update(StorageKey::Tailors, &token.tailor_id, &tailor, version)
			.await?;
		self.event_bus
			.publish(AtelierEvent::Capacity(CapacityEvent::Released {
				tailor_id: tailor.id.clone(),
				reserved_today: tailor.capacity.reserved_today(),
			}));
		Ok(true)
	}

	/// Starts a new business day for one tailor, dropping every hold.
	///
	/// Moving the day backwards is rejected; resetting the same day twice
	/// clears it twice.
	#[instrument(skip_all, fields(tailor_id = %truncate_id(tailor_id), day = %day))]
	pub async fn reset_daily(&self, tailor_id: &str, day: NaiveDate) -> Result<Tailor, CoreError> {
		let tailor = with_conflict_retry(&self.conflicts, move || async move {
			let Versioned {
				version,
				data: mut tailor,
			} = self.records.get::<Tailor>(StorageKey::Tailors, tailor_id).await?;

			if day < tailor.capacity.business_day {
				return Err(CoreError::InvalidConfiguration(format!(
					"cannot reset {} back to {} from {}",
					tailor_id, day, tailor.capacity.business_day
				)));
			}
			tailor.capacity.business_day = day;
			tailor.capacity.held.clear();
			tailor.updated_at = Utc::now();

			self.records
				.update(StorageKey::Tailors, tailor_id, &tailor, version)
				.await?;
			Ok(tailor)
		})
		.await?;

		self.event_bus
			.publish(AtelierEvent::Capacity(CapacityEvent::Reset {
				tailor_id: tailor.id.clone(),
				business_day: day,
			}));
		Ok(tailor)
	}

	/// Resets every tailor to `day`. Returns how many were reset.
	pub async fn reset_all(&self, day: NaiveDate) -> Result<usize, CoreError> {
		let mut reset = 0;
		for tailor in self.list().await? {
			if tailor.capacity.business_day > day {
				tracing::warn!(tailor_id = %tailor.id, "Skipping tailor already past {}", day);
				continue;
			}
			self.reset_daily(&tailor.id, day).await?;
			reset += 1;
		}
		tracing::info!(reset, %day, "Daily capacity reset");
		Ok(reset)
	}
}
