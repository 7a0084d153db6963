//! Rule-evaluation engine for tax and benefit microsimulation.
//!
//! Variables are registered with a formula or as inputs, bound to an entity
//! (person, tax unit, ...) and a period granularity, then computed on demand
//! by a `Simulation` that memoizes every (variable, period) result.

pub mod analysis;
pub mod compute;
pub mod config;
pub mod display;
pub mod entity;
pub mod parameters;
pub mod period;
pub mod rules;
pub mod store;

pub use compute::{Array, ComputationError, EntryStatus, Scope, Simulation};
pub use config::EngineConfig;
pub use entity::{EntityGraph, EntityKind};
pub use parameters::ParameterTree;
pub use period::{Granularity, Period};
pub use store::{Reconciliation, ValueType, VariableDefinition, VariableRegistry};
