//! Typed record groups (Person, TaxUnit, ...) and their membership relations.
pub mod graph;
pub mod kind;

pub use graph::{EntityGraph, EntityGraphBuilder};
pub use kind::{EntityId, EntityKind};
