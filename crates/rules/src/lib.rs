//! Alert rule engine.
//!
//! This crate provides:
//! - The pure price/volume condition evaluator
//! - The cooldown gate that decides notify/skip and the next rule state
//! - The `RuleStore` seam with in-memory and JSON-file implementations and a
//!   read-only wrapper for dry runs
//! - An in-memory per-rule audit trail

pub mod audit_log;
pub mod evaluator;
pub mod gate;
pub mod store;

pub use evaluator::evaluate;
pub use gate::{CooldownGate, GateDecision};
pub use store::{RuleStore, StateUpdate, StoreError};
