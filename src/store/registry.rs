use super::types::*;
use crate::analysis::topology;
use crate::compute::ComputationError;
use std::collections::HashMap;

/// Catalog of every variable a simulation can compute. Names are unique.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    defs: Vec<VariableDefinition>,
    by_name: HashMap<String, VariableId>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.defs.len()
    }

    /// Adds a variable. Re-registering a name is an error rather than a silent override.
    pub fn register(&mut self, def: VariableDefinition) -> Result<VariableId, ComputationError> {
        let name = def.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(ComputationError::DuplicateVariable { name });
        }
        let invalid = |reason: &str| ComputationError::InvalidDefinition { name: name.clone(), reason: reason.into() };
        if name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if def.reconciliation == Reconciliation::Split && def.value_type != ValueType::Float {
            return Err(invalid("only float variables can be split across periods"));
        }
        if let ValueType::Category(labels) = &def.value_type {
            if labels.is_empty() {
                return Err(invalid("a categorical variable needs at least one label"));
            }
        }
        if let VariableKind::Input { default } = def.kind {
            def.coerce(0, default).map_err(|_| invalid("default value does not fit the value type"))?;
        }

        let id = VariableId::new(self.defs.len());
        self.by_name.insert(name, id);
        self.defs.push(def);
        Ok(id)
    }

    pub fn id(&self, name: &str) -> Result<VariableId, ComputationError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ComputationError::UnknownVariable { name: name.to_string() })
    }

    pub fn lookup(&self, name: &str) -> Result<&VariableDefinition, ComputationError> {
        self.id(name).map(|id| self.get(id))
    }

    #[inline(always)]
    pub fn get(&self, id: VariableId) -> &VariableDefinition {
        &self.defs[id.index()]
    }

    pub fn name(&self, id: VariableId) -> &str {
        self.defs[id.index()].name()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VariableId, &VariableDefinition)> {
        self.defs.iter().enumerate().map(|(i, d)| (VariableId::new(i), d))
    }

    /// Declared dependencies of `name`, without running its formula.
    pub fn dependencies(&self, name: &str) -> Result<&[String], ComputationError> {
        self.lookup(name).map(|d| d.dependencies.as_slice())
    }

    /// Registered names ending in `suffix`, in registration order.
    pub fn names_with_suffix(&self, suffix: &str) -> Vec<String> {
        self.defs
            .iter()
            .map(VariableDefinition::name)
            .filter(|n| n.ends_with(suffix))
            .map(str::to_string)
            .collect()
    }

    /// Static validation: every declared dependency exists and the declared
    /// graph has no cycle. Runtime cycle detection still guards undeclared reads.
    pub fn check(&self) -> Result<(), ComputationError> {
        topology::sort(self).map(|_| ())
    }
}
