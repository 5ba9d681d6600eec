//! Core atelier engine that owns every component and exposes the operations
//! the service layer calls.
//!
//! This module contains the main AtelierEngine struct, which wires the order
//! state machine, the tailor registry, the assignment engine and the
//! scheduling coordinator to one storage service and one event bus, and
//! runs the periodic backlog sweep.

pub mod event_bus;
pub mod lifecycle;

use crate::capacity::{NewTailor, TailorRegistry, TailorUpdate};
use crate::coordinator::SchedulingCoordinator;
use crate::production::{AssignmentEngine, SweepReport};
use crate::records::Records;
use crate::retry::RetryPolicy;
use crate::state::OrderStateMachine;
use crate::CoreError;
use atelier_config::Config;
use atelier_pricing::PricingService;
use atelier_storage::StorageService;
use atelier_types::{
	queue_item_id_for, truncate_id, Actor, AtelierEvent, CustomOrderConfig, LineItem, Order,
	OrderEvent, OrderStatus, PriceBreakdown, ProductionQueueItem, QueueStatus,
	RawCustomOrderConfig, StatusHistoryEntry, Tailor,
};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

/// Errors that can occur while starting, running or stopping the engine.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
	#[error(transparent)]
	Core(#[from] CoreError),
}

/// A new order as submitted by a customer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewOrder {
	/// Generated when absent.
	pub id: Option<String>,
	pub customer_id: String,
	pub line_items: Vec<LineItem>,
	pub custom_config: Option<CustomOrderConfig>,
	/// Marks the whole order as rush, whatever the custom configuration says.
	pub is_rush_order: bool,
}

impl NewOrder {
	fn validate(&self) -> Result<(), CoreError> {
		if self.customer_id.trim().is_empty() {
			return Err(CoreError::InvalidConfiguration(
				"customer_id cannot be empty".into(),
			));
		}
		if self.line_items.is_empty() && self.custom_config.is_none() {
			return Err(CoreError::InvalidConfiguration(
				"an order needs at least one garment".into(),
			));
		}
		if let Some(item) = self.line_items.iter().find(|item| item.quantity == 0) {
			return Err(CoreError::InvalidConfiguration(format!(
				"line item {} has zero quantity",
				item.product_id
			)));
		}
		Ok(())
	}
}

/// Main atelier engine.
#[derive(Clone)]
pub struct AtelierEngine {
	pub(crate) config: Config,
	pub(crate) storage: Arc<StorageService>,
	pub(crate) pricing: Arc<PricingService>,
	pub(crate) tailors: Arc<TailorRegistry>,
	pub(crate) state_machine: Arc<OrderStateMachine>,
	pub(crate) assignment: Arc<AssignmentEngine>,
	pub(crate) coordinator: Arc<SchedulingCoordinator>,
	pub(crate) event_bus: event_bus::EventBus,
}

impl AtelierEngine {
	/// Creates a new engine over the given storage service.
	pub fn new(config: Config, storage: Arc<StorageService>, event_bus: event_bus::EventBus) -> Self {
		let store_retry = RetryPolicy::store(&config.scheduling);
		let conflicts = RetryPolicy::conflicts(&config.scheduling);
		let records = Records::new(storage.clone(), store_retry);

		let pricing = Arc::new(PricingService::new(&config.pricing));
		let tailors = Arc::new(TailorRegistry::new(
			records.clone(),
			conflicts,
			event_bus.clone(),
		));
		let state_machine = Arc::new(OrderStateMachine::new(records.clone()));
		let assignment = Arc::new(AssignmentEngine::new(
			records,
			tailors.clone(),
			event_bus.clone(),
			config.scheduling.clone(),
		));
		let coordinator = Arc::new(SchedulingCoordinator::new(
			state_machine.clone(),
			assignment.clone(),
			event_bus.clone(),
			conflicts,
		));

		Self {
			config,
			storage,
			pricing,
			tailors,
			state_machine,
			assignment,
			coordinator,
			event_bus,
		}
	}

	/// Validates, prices and stores a new order in `pending-payment`.
	///
	/// Nothing is stored when validation or pricing fails.
	#[instrument(skip_all, fields(customer_id = %truncate_id(&new.customer_id)))]
	pub async fn create_order(&self, new: NewOrder) -> Result<Order, CoreError> {
		new.validate()?;

		let custom_config = new.custom_config.map(|mut config| {
			config.is_rush_order |= new.is_rush_order;
			config
		});
		let price = custom_config
			.as_ref()
			.map(|config| self.pricing.quote(config))
			.transpose()?;
		let required_specialization = match (&custom_config, new.line_items.first()) {
			(Some(config), _) => config.garment,
			(None, Some(item)) => item.category,
			(None, None) => {
				return Err(CoreError::InvalidConfiguration(
					"an order needs at least one garment".into(),
				))
			},
		};
		let is_rush_order = new.is_rush_order
			|| custom_config
				.as_ref()
				.is_some_and(|config| config.is_rush_order);

		let now = Utc::now();
		let actor = Actor::customer(new.customer_id.clone());
		let order = Order {
			id: new.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
			customer_id: new.customer_id,
			line_items: new.line_items,
			custom_config,
			price,
			is_rush_order,
			required_specialization,
			status: OrderStatus::PendingPayment,
			status_history: vec![StatusHistoryEntry {
				status: OrderStatus::PendingPayment,
				at: now,
				actor,
				note: None,
			}],
			cancellation: None,
			refund: None,
			created_at: now,
			updated_at: now,
		};

		self.state_machine.create(&order).await?;
		self.event_bus
			.publish(AtelierEvent::Order(OrderEvent::Created {
				order_id: order.id.clone(),
				customer_id: order.customer_id.clone(),
				total: order.price.as_ref().map(|price| price.total),
			}));
		tracing::info!(
			order_id = %truncate_id(&order.id),
			rush = order.is_rush_order,
			garment = %order.required_specialization,
			"Order created"
		);
		Ok(order)
	}

	/// Moves an order to `target`, keeping the production queue in step.
	pub async fn transition_order(
		&self,
		order_id: &str,
		target: OrderStatus,
		actor: &Actor,
		note: Option<&str>,
	) -> Result<Order, CoreError> {
		self.coordinator
			.transition_order(order_id, target, actor, note)
			.await
	}

	pub async fn get_order(&self, order_id: &str) -> Result<Order, CoreError> {
		self.state_machine.get(order_id).await
	}

	/// The production queue item of an order, once it reached
	/// `material-arranged`.
	pub async fn get_queue_item(
		&self,
		order_id: &str,
	) -> Result<Option<ProductionQueueItem>, CoreError> {
		self.assignment.find_for_order(order_id).await
	}

	/// Moves an order's queue item along the shop floor.
	pub async fn advance_queue_item(
		&self,
		order_id: &str,
		status: QueueStatus,
	) -> Result<ProductionQueueItem, CoreError> {
		self.assignment
			.advance_queue_status(&queue_item_id_for(order_id), status)
			.await
	}

	/// Takes an order's work away from its tailor and gives it to another.
	pub async fn reassign_queue_item(
		&self,
		order_id: &str,
		reason: &str,
	) -> Result<ProductionQueueItem, CoreError> {
		self.assignment
			.reassign(&queue_item_id_for(order_id), reason)
			.await
	}

	pub async fn register_tailor(&self, tailor: NewTailor) -> Result<Tailor, CoreError> {
		self.tailors.register(tailor).await
	}

	pub async fn update_tailor(
		&self,
		tailor_id: &str,
		update: TailorUpdate,
	) -> Result<Tailor, CoreError> {
		self.tailors.update(tailor_id, update).await
	}

	pub async fn get_tailor(&self, tailor_id: &str) -> Result<Tailor, CoreError> {
		self.tailors.get(tailor_id).await
	}

	pub async fn list_tailors(&self) -> Result<Vec<Tailor>, CoreError> {
		self.tailors.list().await
	}

	/// Starts `day` for every tailor. Returns how many were reset.
	pub async fn reset_daily_capacity(&self, day: NaiveDate) -> Result<usize, CoreError> {
		self.tailors.reset_all(day).await
	}

	/// Prices a client-supplied configuration without storing anything.
	pub fn quote(&self, raw: RawCustomOrderConfig) -> Result<PriceBreakdown, CoreError> {
		Ok(self.pricing.quote_raw(raw)?)
	}

	pub async fn sweep_backlog(&self) -> Result<SweepReport, CoreError> {
		self.assignment.sweep_backlog().await
	}

	/// Registers configured tailors that are missing from the store.
	///
	/// Tailors already stored keep their current settings.
	pub async fn seed_tailors(&self) -> Result<usize, CoreError> {
		let mut seeded = 0;
		for seed in &self.config.tailors {
			if self.tailors.exists(&seed.id).await? {
				continue;
			}
			let registered = self
				.tailors
				.register(NewTailor {
					id: Some(seed.id.clone()),
					name: seed.name.clone(),
					specializations: seed.specializations.iter().copied().collect(),
					max_orders_per_day: seed.max_orders_per_day,
					performance_score: seed.performance_score,
				})
				.await;
			match registered {
				Ok(_) => seeded += 1,
				// Another instance seeded it first
				Err(CoreError::AlreadyExists(_)) => {},
				Err(e) => return Err(e),
			}
		}
		Ok(seeded)
	}

	/// Main loop: sweeps the backlog on a fixed interval until Ctrl-C.
	pub async fn run(&self) -> Result<(), EngineError> {
		let mut sweep_interval = tokio::time::interval(Duration::from_secs(
			self.config.scheduling.sweep_interval_seconds.max(1),
		));

		loop {
			tokio::select! {
				_ = sweep_interval.tick() => {
					if let Err(e) = self.sweep_backlog().await {
						tracing::warn!(error = %e, "Backlog sweep failed");
					}
				}

				// Shutdown signal
				_ = tokio::signal::ctrl_c() => {
					break;
				}
			}
		}

		Ok(())
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the storage service.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use atelier_config::ConfigBuilder;
	use atelier_storage::implementations::memory::MemoryStorage;
	use atelier_types::{
		CapacityEvent, EmbroideryComplexity, FabricSource, GarmentCategory, ProductionEvent,
		ServiceType,
	};
	use rust_decimal_macros::dec;
	use std::collections::BTreeSet;

	fn engine(config: Config) -> AtelierEngine {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		AtelierEngine::new(config, storage, event_bus::EventBus::new(256))
	}

	fn sherwani(rush: bool) -> CustomOrderConfig {
		CustomOrderConfig {
			garment: GarmentCategory::Sherwani,
			service_type: ServiceType::FullyCustom,
			fabric_source: FabricSource::CustomerProvided,
			fabric_type: None,
			embroidery: EmbroideryComplexity::Medium,
			add_ons: vec!["monogram".into()],
			is_rush_order: rush,
		}
	}

	fn custom_order(id: &str, rush: bool) -> NewOrder {
		NewOrder {
			id: Some(id.to_string()),
			customer_id: "c-1".into(),
			custom_config: Some(sherwani(rush)),
			..NewOrder::default()
		}
	}

	async fn to_material_arranged(engine: &AtelierEngine, order_id: &str) -> Order {
		let verifier = Actor::payment_verifier("v-1");
		engine
			.transition_order(order_id, OrderStatus::PaymentVerified, &verifier, None)
			.await
			.unwrap();
		engine
			.transition_order(order_id, OrderStatus::MaterialArranged, &Actor::admin("a-1"), None)
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_create_order_prices_and_records_history() {
		let engine = engine(ConfigBuilder::new().build());
		let mut events = engine.event_bus().subscribe();

		let order = engine.create_order(custom_order("o-1", true)).await.unwrap();
		assert_eq!(order.status, OrderStatus::PendingPayment);
		assert_eq!(order.required_specialization, GarmentCategory::Sherwani);
		assert!(order.is_rush_order);
		assert_eq!(order.status_history.len(), 1);
		assert_eq!(order.status_history[0].actor, Actor::customer("c-1"));

		// 2500 + 1500 + 500 = 4500, rush 1125, tax 281.25
		let price = order.price.clone().unwrap();
		assert_eq!(price.subtotal, dec!(4500));
		assert_eq!(price.rush_surcharge, dec!(1125));
		assert_eq!(price.total, dec!(5906));

		match events.recv().await.unwrap() {
			AtelierEvent::Order(OrderEvent::Created { order_id, total, .. }) => {
				assert_eq!(order_id, "o-1");
				assert_eq!(total, Some(dec!(5906)));
			},
			other => panic!("unexpected event {:?}", other),
		}
		assert_eq!(engine.get_order("o-1").await.unwrap(), order);
	}

	#[tokio::test]
	async fn test_order_level_rush_flag_applies_to_price() {
		let engine = engine(ConfigBuilder::new().build());
		let mut new = custom_order("o-1", false);
		new.is_rush_order = true;

		let order = engine.create_order(new).await.unwrap();
		assert!(order.custom_config.unwrap().is_rush_order);
		assert_eq!(order.price.unwrap().rush_surcharge, dec!(1125));
	}

	#[tokio::test]
	async fn test_invalid_orders_are_not_stored() {
		let engine = engine(ConfigBuilder::new().build());

		let empty = NewOrder {
			id: Some("o-empty".into()),
			customer_id: "c-1".into(),
			..NewOrder::default()
		};
		assert!(matches!(
			engine.create_order(empty).await,
			Err(CoreError::InvalidConfiguration(_))
		));

		let zero = NewOrder {
			id: Some("o-zero".into()),
			customer_id: "c-1".into(),
			line_items: vec![LineItem {
				product_id: "p-1".into(),
				name: "Linen shirt".into(),
				category: GarmentCategory::Shirt,
				quantity: 0,
				unit_price: dec!(1999),
			}],
			..NewOrder::default()
		};
		assert!(engine.create_order(zero).await.is_err());

		let mut unpriceable = custom_order("o-silk", false);
		if let Some(config) = unpriceable.custom_config.as_mut() {
			config.fabric_source = FabricSource::PlatformProvided;
			config.fabric_type = Some("velvet".into());
		}
		assert!(matches!(
			engine.create_order(unpriceable).await,
			Err(CoreError::InvalidConfiguration(_))
		));

		for id in ["o-empty", "o-zero", "o-silk"] {
			assert!(matches!(engine.get_order(id).await, Err(CoreError::NotFound(_))));
		}
	}

	#[tokio::test]
	async fn test_catalog_order_takes_category_from_first_item() {
		let engine = engine(ConfigBuilder::new().build());
		let order = engine
			.create_order(NewOrder {
				customer_id: "c-1".into(),
				line_items: vec![LineItem {
					product_id: "p-7".into(),
					name: "Wool trouser".into(),
					category: GarmentCategory::Trouser,
					quantity: 2,
					unit_price: dec!(2400),
				}],
				..NewOrder::default()
			})
			.await
			.unwrap();
		assert_eq!(order.required_specialization, GarmentCategory::Trouser);
		assert!(order.price.is_none());
		assert!(!order.id.is_empty());
	}

	#[tokio::test]
	async fn test_queue_item_absent_before_material_arranged() {
		let engine = engine(ConfigBuilder::new().build());
		engine.create_order(custom_order("o-1", false)).await.unwrap();
		assert_eq!(engine.get_queue_item("o-1").await.unwrap(), None);
		assert_eq!(engine.get_queue_item("o-missing").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_assignment_fills_last_slot() {
		let config = ConfigBuilder::new()
			.tailor("t-1", &[GarmentCategory::Sherwani], 5, 4.5)
			.build();
		let engine = engine(config);
		engine.seed_tailors().await.unwrap();
		for i in 0..4 {
			engine.tailors.reserve("t-1", &format!("earlier-{}", i)).await.unwrap();
		}

		engine.create_order(custom_order("o-1", false)).await.unwrap();
		to_material_arranged(&engine, "o-1").await;

		let item = engine.get_queue_item("o-1").await.unwrap().unwrap();
		assert_eq!(item.status, QueueStatus::Assigned);
		assert_eq!(item.assigned_tailor_id.as_deref(), Some("t-1"));
		let capacity = engine.get_tailor("t-1").await.unwrap().capacity;
		assert_eq!(capacity.reserved_today(), 5);
		assert_eq!(capacity.max_orders_per_day, 5);
	}

	#[tokio::test]
	async fn test_full_tailor_leaves_item_pending() {
		let config = ConfigBuilder::new()
			.tailor("t-1", &[GarmentCategory::Sherwani], 5, 4.5)
			.tailor("t-2", &[GarmentCategory::Blouse], 5, 4.9)
			.build();
		let engine = engine(config);
		engine.seed_tailors().await.unwrap();
		for i in 0..5 {
			engine.tailors.reserve("t-1", &format!("earlier-{}", i)).await.unwrap();
		}
		let mut events = engine.event_bus().subscribe();

		engine.create_order(custom_order("o-1", false)).await.unwrap();
		let order = to_material_arranged(&engine, "o-1").await;
		assert_eq!(order.status, OrderStatus::MaterialArranged);

		let item = engine.get_queue_item("o-1").await.unwrap().unwrap();
		assert_eq!(item.status, QueueStatus::Pending);
		assert!(item.assigned_tailor_id.is_none());
		assert_eq!(engine.get_tailor("t-1").await.unwrap().capacity.reserved_today(), 5);

		let mut backlogged = false;
		while let Ok(event) = events.try_recv() {
			if matches!(event, AtelierEvent::Production(ProductionEvent::Backlogged { .. })) {
				backlogged = true;
			}
		}
		assert!(backlogged);

		// Capacity frees up on the next day and the sweep picks the item up
		let tomorrow = engine
			.get_tailor("t-1")
			.await
			.unwrap()
			.capacity
			.business_day
			.succ_opt()
			.unwrap();
		assert_eq!(engine.reset_daily_capacity(tomorrow).await.unwrap(), 2);
		let report = engine.sweep_backlog().await.unwrap();
		assert_eq!(report.assigned, 1);
	}

	#[tokio::test]
	async fn test_cancelling_assigned_order_frees_capacity() {
		let config = ConfigBuilder::new()
			.tailor("t-1", &[GarmentCategory::Sherwani], 5, 4.5)
			.build();
		let engine = engine(config);
		engine.seed_tailors().await.unwrap();
		engine.tailors.reserve("t-1", "earlier").await.unwrap();

		engine.create_order(custom_order("o-1", false)).await.unwrap();
		to_material_arranged(&engine, "o-1").await;
		assert_eq!(engine.get_tailor("t-1").await.unwrap().capacity.reserved_today(), 2);
		let mut events = engine.event_bus().subscribe();

		let order = engine
			.transition_order(
				"o-1",
				OrderStatus::Cancelled,
				&Actor::customer("c-1"),
				Some("wedding postponed"),
			)
			.await
			.unwrap();
		assert_eq!(order.cancellation.unwrap().reason.as_deref(), Some("wedding postponed"));

		let item = engine.get_queue_item("o-1").await.unwrap().unwrap();
		assert_eq!(item.status, QueueStatus::Cancelled);
		assert_eq!(engine.get_tailor("t-1").await.unwrap().capacity.reserved_today(), 1);

		let mut released = false;
		while let Ok(event) = events.try_recv() {
			if matches!(event, AtelierEvent::Capacity(CapacityEvent::Released { .. })) {
				released = true;
			}
		}
		assert!(released);

		// Refunding runs the cancel side effect again without releasing twice
		engine
			.transition_order("o-1", OrderStatus::Refunded, &Actor::admin("a-1"), None)
			.await
			.unwrap();
		assert_eq!(engine.get_tailor("t-1").await.unwrap().capacity.reserved_today(), 1);
	}

	#[tokio::test]
	async fn test_price_snapshot_survives_the_lifecycle() {
		let config = ConfigBuilder::new()
			.tailor("t-1", &[GarmentCategory::Sherwani], 3, 4.0)
			.build();
		let engine = engine(config);
		engine.seed_tailors().await.unwrap();
		let created = engine.create_order(custom_order("o-1", true)).await.unwrap();

		to_material_arranged(&engine, "o-1").await;
		let admin = Actor::admin("a-1");
		engine
			.transition_order("o-1", OrderStatus::InProgress, &admin, None)
			.await
			.unwrap();
		for status in [QueueStatus::Cutting, QueueStatus::Stitching] {
			engine.advance_queue_item("o-1", status).await.unwrap();
		}
		engine
			.transition_order("o-1", OrderStatus::QualityCheck, &admin, None)
			.await
			.unwrap();

		let stored = engine.get_order("o-1").await.unwrap();
		assert_eq!(stored.price, created.price);
		assert_eq!(stored.status_history.len(), 5);
	}

	#[tokio::test]
	async fn test_seeding_is_idempotent() {
		let config = ConfigBuilder::new()
			.tailor("t-1", &[GarmentCategory::Shirt], 3, 4.0)
			.tailor("t-2", &[GarmentCategory::Suit, GarmentCategory::Blazer], 2, 3.0)
			.build();
		let engine = engine(config);

		assert_eq!(engine.seed_tailors().await.unwrap(), 2);
		engine
			.update_tailor(
				"t-1",
				TailorUpdate {
					max_orders_per_day: Some(6),
					..TailorUpdate::default()
				},
			)
			.await
			.unwrap();
		assert_eq!(engine.seed_tailors().await.unwrap(), 0);

		let tailors = engine.list_tailors().await.unwrap();
		assert_eq!(tailors.len(), 2);
		assert_eq!(tailors[0].capacity.max_orders_per_day, 6);
		assert_eq!(
			tailors[1].specializations,
			BTreeSet::from([GarmentCategory::Suit, GarmentCategory::Blazer])
		);
	}

	#[tokio::test]
	async fn test_reassign_through_engine() {
		let config = ConfigBuilder::new()
			.tailor("t-1", &[GarmentCategory::Sherwani], 3, 4.9)
			.tailor("t-2", &[GarmentCategory::Sherwani], 3, 4.1)
			.build();
		let engine = engine(config);
		engine.seed_tailors().await.unwrap();
		engine.create_order(custom_order("o-1", false)).await.unwrap();
		to_material_arranged(&engine, "o-1").await;
		assert_eq!(
			engine.get_queue_item("o-1").await.unwrap().unwrap().assigned_tailor_id.as_deref(),
			Some("t-1")
		);

		let item = engine.reassign_queue_item("o-1", "machine broke").await.unwrap();
		assert_eq!(item.assigned_tailor_id.as_deref(), Some("t-2"));
		assert_eq!(engine.get_tailor("t-1").await.unwrap().capacity.reserved_today(), 0);
	}

	#[test]
	fn test_quote_matches_created_price() {
		let engine = engine(ConfigBuilder::new().build());
		let raw = RawCustomOrderConfig {
			garment: "sherwani".into(),
			service_type: "fully-custom".into(),
			fabric_source: "customer-provided".into(),
			fabric_type: None,
			embroidery: "medium".into(),
			add_ons: vec!["monogram".into()],
			is_rush_order: true,
		};
		let quote = engine.quote(raw).unwrap();
		assert_eq!(quote.total, dec!(5906));
	}
}
