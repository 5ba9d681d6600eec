//! Production queue management.
//!
//! Queue items track an order on the shop floor, from the moment its
//! materials are arranged until it is dispatched or cancelled.

pub mod assignment;

pub use assignment::{is_valid_queue_transition, AssignmentEngine, SweepReport};
