//! Static analysis of a variable registry.
pub mod catalog;
pub mod topology;

pub use catalog::{render_catalog, Catalog};
pub use topology::DependencyGraph;
