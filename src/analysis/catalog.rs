//! Documentation of a registry, produced without running any formula.

use super::topology;
use crate::compute::ComputationError;
use crate::period::Granularity;
use crate::store::{ValueType, VariableRegistry};
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub entity: String,
    pub granularity: Granularity,
    pub value_type: &'static str,
    pub is_input: bool,
    pub label: Option<String>,
    pub unit: Option<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    /// Dependency order: every entry comes after what it reads.
    pub entries: Vec<CatalogEntry>,
    pub per_entity: BTreeMap<String, usize>,
    pub inputs: usize,
    pub formulas: usize,
}

impl Catalog {
    pub fn analyze(registry: &VariableRegistry) -> Result<Self, ComputationError> {
        let mut per_entity = BTreeMap::new();
        let mut inputs = 0;
        let entries: Vec<CatalogEntry> = topology::sort(registry)?
            .into_iter()
            .map(|id| {
                let def = registry.get(id);
                *per_entity.entry(def.entity.clone()).or_insert(0) += 1;
                inputs += def.is_input() as usize;
                CatalogEntry {
                    name: def.name().to_string(),
                    entity: def.entity.clone(),
                    granularity: def.granularity,
                    value_type: match def.value_type {
                        ValueType::Float => "float",
                        ValueType::Bool => "bool",
                        ValueType::Category(_) => "category",
                    },
                    is_input: def.is_input(),
                    label: def.meta.label.clone(),
                    unit: def.meta.unit.clone(),
                    dependencies: def.dependencies.clone(),
                }
            })
            .collect();
        let formulas = entries.len() - inputs;
        Ok(Self { entries, per_entity, inputs, formulas })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "VARIABLE CATALOG ({} inputs, {} formulas)", self.inputs, self.formulas);
        for (entity, count) in &self.per_entity {
            let _ = writeln!(out, "  {entity}: {count}");
        }
        let _ = writeln!(out, "--------------------------------------------------");
        for e in &self.entries {
            let kind = if e.is_input { "input" } else { "formula" };
            let _ = write!(out, "{} [{}, {}, {}, {}]", e.name, e.entity, e.granularity, e.value_type, kind);
            if let Some(unit) = &e.unit {
                let _ = write!(out, " ({unit})");
            }
            let _ = writeln!(out);
            if let Some(label) = &e.label {
                let _ = writeln!(out, "|  {label}");
            }
            if !e.dependencies.is_empty() {
                let _ = writeln!(out, "`-- reads: {}", e.dependencies.join(", "));
            }
        }
        out
    }
}

/// Renders the catalog of `registry` in dependency order.
pub fn render_catalog(registry: &VariableRegistry) -> Result<String, ComputationError> {
    Ok(Catalog::analyze(registry)?.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules;

    #[test]
    fn test_catalog_of_rule_pack() {
        let reg = rules::registry().unwrap();
        let catalog = Catalog::analyze(&reg).unwrap();
        assert_eq!(catalog.inputs + catalog.formulas, reg.count());
        assert_eq!(catalog.inputs, 9);

        let pos = |name: &str| catalog.entries.iter().position(|e| e.name == name).unwrap();
        assert!(pos("gross_was") < pos("txearn_was"));
        assert!(pos("txearn_was") < pos("ptax_ss_was"));
        assert!(pos("ptax_ss_was") < pos("filer_ptax_ss_was"));

        let text = render_catalog(&reg).unwrap();
        assert!(text.contains("gross_was [person, YEAR, float, formula]"));
        assert!(text.contains("`-- reads: e00200, pencon"));
        assert!(text.contains("mars [tax_unit, YEAR, category, input]"));
    }
}
