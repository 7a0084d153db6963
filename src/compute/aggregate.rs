//! Reusable aggregation building blocks for rule authors.

use super::error::ComputationError;
use super::kernel;
use super::scope::Scope;
use crate::period::Period;
use crate::store::{Formula, VariableDefinition, VariableRegistry};

/// Person flag marking members who are dependents of their tax unit.
pub const DEPENDENT_FLAG: &str = "is_tax_unit_dependent";

/// Elementwise sum of several variables of the scope's own entity.
pub fn add(scope: &Scope<'_>, period: Period, names: &[&str]) -> Result<Vec<f64>, ComputationError> {
    let mut total = scope.filled(0.0);
    for name in names {
        total = kernel::add(&total, &scope.calc(name, period)?)?;
    }
    Ok(total)
}

/// Sum of the person variable `name` over each group's non-dependent members.
pub fn non_dependent_sum(scope: &Scope<'_>, name: &str, period: Period) -> Result<Vec<f64>, ComputationError> {
    let values = scope.members(name, period)?;
    let dependent = scope.members(DEPENDENT_FLAG, period)?;
    scope.sum_where(&values, &kernel::not_(&dependent))
}

/// A formula summing `names`: own-entity variables directly, person
/// variables across members when evaluated on a group.
pub fn sum_of_variables(names: Vec<String>) -> Formula {
    Formula::new(move |scope, period, _| {
        let mut total = scope.filled(0.0);
        for name in &names {
            let own = scope.registry().lookup(name)?.entity == scope.entity().key;
            let values = if own || scope.is_person() {
                scope.calc(name, period)?.to_vec()
            } else {
                scope.sum(&scope.members(name, period)?)?
            };
            total = kernel::add(&total, &values)?;
        }
        Ok(total)
    })
}

/// Registered variables whose name ends in `suffix`, in registration order.
pub fn variables_with_suffix(registry: &VariableRegistry, suffix: &str) -> Vec<String> {
    registry.names_with_suffix(suffix)
}

/// A variable summing every variable currently registered with `suffix`.
pub fn sum_of_suffixed(registry: &VariableRegistry, name: &str, entity: &str, suffix: &str) -> VariableDefinition {
    VariableDefinition::sum_of(name, entity, variables_with_suffix(registry, suffix))
}
