use crate::period::{Granularity, Period, PeriodError};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputationError {
    #[error("Unknown variable '{name}'")]
    UnknownVariable { name: String },
    #[error("Variable '{name}' is already registered")]
    DuplicateVariable { name: String },
    #[error("Invalid definition for '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },
    #[error("Unknown entity '{name}'")]
    UnknownEntity { name: String },
    #[error("Invalid membership for entity '{entity}': {reason}")]
    InvalidMembership { entity: String, reason: String },
    #[error("Variable '{variable}' belongs to '{actual}' but was requested through a '{expected}' accessor")]
    EntityMismatch { variable: String, expected: String, actual: String },
    #[error("Parameter '{path}' not found")]
    ParameterNotFound { path: String },
    #[error("Parameter '{path}' has no value in effect on {date}")]
    NoEffectiveValue { path: String, date: NaiveDate },
    #[error("Parameter '{path}' is not a {expected}")]
    ParameterType { path: String, expected: &'static str },
    #[error("Circular dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },
    #[error("Variable '{variable}' is defined per {defined} and has no reconciliation policy for period {requested}")]
    GranularityMismatch { variable: String, defined: Granularity, requested: Period },
    #[error("Shape mismatch in {context}: expected {expected} values, got {actual}")]
    ShapeMismatch { context: String, expected: usize, actual: usize },
    #[error("Invalid value for '{variable}' at record {index}: {reason}")]
    InvalidValue { variable: String, index: usize, reason: String },
    #[error("Formula for '{variable}' read '{dependency}' without declaring it")]
    UndeclaredDependency { variable: String, dependency: String },
    #[error("Resolution depth exceeded {depth} while computing '{variable}'")]
    RecursionLimit { variable: String, depth: usize },
    #[error("Formula for '{variable}' failed: {message}")]
    Formula { variable: String, message: String },
    #[error("While computing '{variable}' for {period}: {source}")]
    Dependency { variable: String, period: Period, source: Box<ComputationError> },
    #[error(transparent)]
    InvalidPeriod(#[from] PeriodError),
    #[error("Computation cancelled")]
    Cancelled,
}

impl ComputationError {
    /// The innermost error, beneath every `Dependency` link.
    pub fn root_cause(&self) -> &ComputationError {
        let mut current = self;
        while let ComputationError::Dependency { source, .. } = current {
            current = source;
        }
        current
    }

    /// The `variable@period` links from the outermost request down to the root cause.
    pub fn chain(&self) -> Vec<String> {
        let mut links = Vec::new();
        let mut current = self;
        while let ComputationError::Dependency { variable, period, source } = current {
            links.push(format!("{variable}@{period}"));
            current = source;
        }
        links
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), ComputationError::Cancelled)
    }

    /// Errors that describe the request rather than the entry: cancellation
    /// and running out of resolution depth. These are never cached.
    pub fn is_transient(&self) -> bool {
        matches!(self.root_cause(), ComputationError::Cancelled | ComputationError::RecursionLimit { .. })
    }

    pub(crate) fn within(self, variable: &str, period: Period) -> Self {
        ComputationError::Dependency {
            variable: variable.to_string(),
            period,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_and_root_cause() {
        let root = ComputationError::ParameterNotFound { path: "tax.rate".into() };
        let err = root
            .clone()
            .within("txearn_was", Period::year(2024))
            .within("ptax_ss_was", Period::year(2024));

        assert_eq!(err.root_cause(), &root);
        assert_eq!(err.chain(), vec!["ptax_ss_was@2024", "txearn_was@2024"]);
        assert!(err.to_string().contains("tax.rate"));
        assert!(!err.is_cancelled());
        assert!(!err.is_transient());

        let deep = ComputationError::RecursionLimit { variable: "balance".into(), depth: 3 }.within("balance", Period::year(2024));
        assert!(deep.is_transient());
        assert!(!deep.is_cancelled());
    }
}
