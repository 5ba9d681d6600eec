//! Core engine for the atelier production system.
//!
//! This crate owns the order lifecycle and the shop floor: the order state
//! machine, the tailor capacity registry, the production queue with its
//! assignment rules, and the coordinator that keeps orders and queue items in
//! step. Every record lives in a shared versioned store, so any number of
//! engine instances can serve requests against the same data; contention is
//! resolved with conditional writes, never with in-process locks.

pub mod builder;
pub mod capacity;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod production;
pub mod records;
pub mod retry;
pub mod state;
#[cfg(test)]
mod testing;

pub use builder::{AtelierBuilder, AtelierFactories, BuilderError};
pub use capacity::{NewTailor, TailorRegistry, TailorUpdate};
pub use coordinator::SchedulingCoordinator;
pub use engine::{event_bus::EventBus, AtelierEngine, EngineError, NewOrder};
pub use error::CoreError;
pub use production::{AssignmentEngine, SweepReport};
pub use retry::RetryPolicy;
pub use state::{OrderStateMachine, TransitionOutcome};
