//! Time-indexed policy parameters, queried by dotted path and period.
pub mod scale;
pub mod tree;

pub use scale::{Bracket, MarginalScale, ScaleSeries};
pub use tree::{ParameterLoadError, ParameterNode, ParameterSeries, ParameterSnapshot, ParameterTree};
