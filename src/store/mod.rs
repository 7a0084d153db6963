//! The variable registry: named, typed, period-scoped quantities.
pub mod registry;
pub mod types;

pub use registry::VariableRegistry;
pub use types::{Formula, Reconciliation, ValueType, VariableDefinition, VariableId, VariableKind, VariableMetadata};
