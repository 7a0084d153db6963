//! Evaluates variables: cache, resolution state machine, formula accessors and array kernels.
pub mod aggregate;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod ledger;
pub mod scope;

pub use engine::Simulation;
pub use error::ComputationError;
pub use ledger::{Array, CacheKey, EntryStatus, Ledger};
pub use scope::Scope;
