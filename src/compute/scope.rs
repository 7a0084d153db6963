//! The accessor handed to formulas.
//!
//! A `Scope` is bound to the entity of the variable being computed. Person
//! scopes may read person variables and project group variables down; group
//! scopes may read their own variables and reduce person variables across
//! members. Entity checks happen before the dependency is resolved.

use super::engine::{Resolver, Simulation};
use super::error::ComputationError;
use super::ledger::{Array, CacheKey};
use crate::entity::{EntityId, EntityKind};
use crate::period::Period;
use crate::store::{VariableDefinition, VariableRegistry};
use tracing::warn;

pub struct Scope<'s> {
    sim: &'s Simulation,
    resolver: &'s Resolver<'s>,
    key: CacheKey,
    entity: EntityId,
    def: &'s VariableDefinition,
}

impl<'s> Scope<'s> {
    pub(crate) fn new(
        sim: &'s Simulation,
        resolver: &'s Resolver<'s>,
        key: CacheKey,
        entity: EntityId,
        def: &'s VariableDefinition,
    ) -> Self {
        Self { sim, resolver, key, entity, def }
    }

    /// Name of the variable being computed.
    pub fn variable(&self) -> &str {
        self.def.name()
    }

    pub fn period(&self) -> Period {
        self.key.period
    }

    pub fn entity(&self) -> &EntityKind {
        self.sim.entities().kind(self.entity)
    }

    pub fn is_person(&self) -> bool {
        self.sim.entities().is_person(self.entity)
    }

    /// Number of records of this scope's entity.
    pub fn count(&self) -> usize {
        self.sim.entities().count(self.entity)
    }

    pub fn registry(&self) -> &VariableRegistry {
        self.sim.registry()
    }

    /// An array of this scope's length holding `value` everywhere.
    pub fn filled(&self, value: f64) -> Vec<f64> {
        vec![value; self.count()]
    }

    /// An author-raised failure attributed to the variable being computed.
    pub fn fail(&self, message: impl Into<String>) -> ComputationError {
        ComputationError::Formula { variable: self.def.name().to_string(), message: message.into() }
    }

    /// Category labels of `name`, for per-category parameter lookups.
    pub fn labels(&self, name: &str) -> Result<Vec<String>, ComputationError> {
        let def = self.sim.registry().lookup(name)?;
        def.value_type.labels().map(<[String]>::to_vec).ok_or_else(|| ComputationError::InvalidDefinition {
            name: name.to_string(),
            reason: "not a category variable".into(),
        })
    }

    /// Value of `name` for `period` on this scope's own entity.
    pub fn calc(&self, name: &str, period: Period) -> Result<Array, ComputationError> {
        self.fetch(name, period, self.entity)
    }

    /// Values of the person variable `name` for every person, from a group scope.
    /// Reduce them with `sum`, `sum_where` or `max`.
    pub fn members(&self, name: &str, period: Period) -> Result<Array, ComputationError> {
        self.require_group()?;
        self.fetch(name, period, EntityId::PERSON)
    }

    /// Value of the `group` variable `name` broadcast onto each person, from a person scope.
    pub fn group(&self, group: &str, name: &str, period: Period) -> Result<Vec<f64>, ComputationError> {
        if !self.is_person() {
            return Err(self.mismatch(name, "person"));
        }
        let gid = self.sim.entities().id_of(group)?;
        let values = self.fetch(name, period, gid)?;
        self.sim.entities().project(gid, &values)
    }

    pub fn sum(&self, person_values: &[f64]) -> Result<Vec<f64>, ComputationError> {
        self.require_group()?;
        self.sim.entities().sum(self.entity, person_values)
    }

    pub fn sum_where(&self, person_values: &[f64], mask: &[f64]) -> Result<Vec<f64>, ComputationError> {
        self.require_group()?;
        self.sim.entities().sum_where(self.entity, person_values, mask)
    }

    pub fn max(&self, person_values: &[f64]) -> Result<Vec<f64>, ComputationError> {
        self.require_group()?;
        self.sim.entities().max(self.entity, person_values)
    }

    /// Number of persons in each group record.
    pub fn member_count(&self) -> Result<Vec<f64>, ComputationError> {
        self.require_group()?;
        self.sim.entities().member_count(self.entity)
    }

    fn require_group(&self) -> Result<(), ComputationError> {
        if self.is_person() {
            return Err(self.mismatch(self.def.name(), "group entity"));
        }
        Ok(())
    }

    fn mismatch(&self, variable: &str, expected: &str) -> ComputationError {
        ComputationError::EntityMismatch {
            variable: variable.to_string(),
            expected: expected.to_string(),
            actual: self.entity().key.clone(),
        }
    }

    fn fetch(&self, name: &str, period: Period, expected: EntityId) -> Result<Array, ComputationError> {
        let id = self.sim.registry().id(name)?;
        let period = period.validate()?;
        let home = self.sim.home(id);
        if home != expected {
            return Err(ComputationError::EntityMismatch {
                variable: name.to_string(),
                expected: self.sim.entities().kind(expected).key.clone(),
                actual: self.sim.entities().kind(home).key.clone(),
            });
        }
        if name != self.def.name() && !self.def.dependencies.iter().any(|d| d == name) {
            if self.sim.config().strict_dependencies {
                return Err(ComputationError::UndeclaredDependency {
                    variable: self.def.name().to_string(),
                    dependency: name.to_string(),
                });
            }
            warn!(variable = self.def.name(), dependency = name, "undeclared dependency");
        }
        self.sim
            .resolve(self.resolver, CacheKey::new(id, period))
            .map_err(|e| e.within(name, period))
    }
}
