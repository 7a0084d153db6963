//! Human-readable renderings of computed results.
pub mod trace;
