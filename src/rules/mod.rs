//! A sample US payroll and income rule pack on the person / tax unit entities.
//!
//! Parameters are read from:
//! `tax.payroll.fica.social_security.{tax_rate, max_taxable_earnings, add_taxable_earnings}`,
//! `tax.payroll.fica.medicare.tax_rate`, `tax.ald.misc.employer_share`,
//! `benefit.unemployment_insurance.exemption.{cutoff.<MARS>, amount}`.
pub mod income;
pub mod inputs;
pub mod payroll;

use crate::compute::ComputationError;
use crate::entity::{EntityGraph, EntityKind};
use crate::store::VariableRegistry;

pub const PERSON: &str = "person";
pub const TAX_UNIT: &str = "tax_unit";

pub fn person() -> EntityKind {
    EntityKind::new(PERSON, "people").with_label("Person")
}

pub fn tax_unit() -> EntityKind {
    EntityKind::new(TAX_UNIT, "tax_units").with_label("Tax unit")
}

/// Persons grouped into tax units; `membership[p]` is the tax unit of person `p`.
pub fn households(membership: Vec<usize>, tax_units: usize) -> Result<EntityGraph, ComputationError> {
    EntityGraph::builder(person(), membership.len()).group(tax_unit(), tax_units, membership).build()
}

/// Every variable of the pack.
pub fn registry() -> Result<VariableRegistry, ComputationError> {
    let mut reg = VariableRegistry::new();
    inputs::register(&mut reg)?;
    payroll::register(&mut reg)?;
    income::register(&mut reg)?;
    reg.check()?;
    Ok(reg)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Simulation;
    use crate::period::Period;
    use std::sync::Arc;

    fn simulation(membership: Vec<usize>, tax_units: usize) -> Simulation {
        Simulation::new(
            Arc::new(registry().unwrap()),
            Arc::new(households(membership, tax_units).unwrap()),
            Arc::new(fixtures::parameters()),
        )
        .unwrap()
    }

    #[test]
    fn test_pack_is_acyclic_and_complete() {
        let reg = registry().unwrap();
        assert!(reg.check().is_ok());
        for name in ["gross_was", "extra_payrolltax", "pre_qbid_taxinc", "tax_unit_capital_gains"] {
            assert!(reg.lookup(name).is_ok(), "{name} missing");
        }
    }

    #[test]
    fn test_wage_and_payroll_chain() {
        let year = Period::year(2023);
        let mut sim = simulation(vec![0], 1);
        sim.set_input("e00200", year, vec![50_000.0]).unwrap();
        sim.set_input("pencon", year, vec![2_000.0]).unwrap();

        assert_eq!(*sim.calculate("gross_was", year).unwrap(), vec![52_000.0]);
        assert_eq!(*sim.calculate("txearn_was", year).unwrap(), vec![52_000.0]);
        let ptax = sim.calculate("ptax_ss_was", year).unwrap();
        assert!((ptax[0] - 3_224.0).abs() < 1e-9);
    }

    #[test]
    fn test_earnings_above_cap() {
        let year = Period::year(2023);
        let mut sim = simulation(vec![0], 1);
        sim.set_input("e00200", year, vec![200_000.0]).unwrap();
        assert_eq!(*sim.calculate("txearn_was", year).unwrap(), vec![160_200.0]);

        // 2022 cap applies to 2022.
        let prior = Period::year(2022);
        sim.set_input("e00200", prior, vec![200_000.0]).unwrap();
        assert_eq!(*sim.calculate("txearn_was", prior).unwrap(), vec![147_000.0]);
    }

    #[test]
    fn test_filer_total_excludes_dependents() {
        let year = Period::year(2023);
        let mut sim = simulation(vec![0, 0], 1);
        sim.set_input("ptax_ss_was", year, vec![1_000.0, 500.0]).unwrap();
        sim.set_input("is_tax_unit_dependent", year, vec![0.0, 1.0]).unwrap();
        assert_eq!(*sim.calculate("filer_ptax_ss_was", year).unwrap(), vec![1_000.0]);
    }

    #[test]
    fn test_self_employment_tax() {
        let year = Period::year(2023);
        let mut sim = simulation(vec![0], 1);
        sim.set_input("sey", year, vec![10_000.0]).unwrap();

        let frac = 1.0 - 0.5 * (0.062 + 0.0145);
        let setax = sim.calculate("setax", year).unwrap();
        let expected = 10_000.0 * frac * (0.062 + 0.0145);
        assert!((setax[0] - expected).abs() < 1e-6);
        assert!((sim.calculate("filer_setax_ss", year).unwrap()[0] - 10_000.0 * frac * 0.062).abs() < 1e-6);
    }

    #[test]
    fn test_extra_payroll_tax_above_threshold() {
        let year = Period::year(2023);
        let mut sim = simulation(vec![0, 0], 1);
        sim.set_input("e00200", year, vec![300_000.0, 400_000.0]).unwrap();
        sim.set_input("is_tax_unit_dependent", year, vec![0.0, 1.0]).unwrap();
        let extra = sim.calculate("extra_payrolltax", year).unwrap();
        assert!((extra[0] - 50_000.0 * 0.062).abs() < 1e-6);
    }

    #[test]
    fn test_unemployment_exclusion_by_filing_status() {
        let year = Period::year(2021);
        let mut sim = simulation(vec![0, 1], 2);
        sim.set_input("filer_e02300", year, vec![12_000.0, 12_000.0]).unwrap();
        sim.set_input("c00100", year, vec![60_000.0, 200_000.0]).unwrap();
        sim.set_input("mars", year, vec![0.0, 1.0]).unwrap();
        assert_eq!(*sim.calculate("pre_qbid_taxinc", year).unwrap(), vec![10_200.0, 0.0]);
    }

    #[test]
    fn test_positive_agi_and_capital_gains() {
        let year = Period::year(2023);
        let mut sim = simulation(vec![0, 0, 1], 2);
        sim.set_input("c00100", year, vec![-5_000.0, 40_000.0]).unwrap();
        sim.set_input("capital_gains", year, vec![100.0, 250.0, 75.0]).unwrap();
        assert_eq!(*sim.calculate("posagi", year).unwrap(), vec![0.0, 40_000.0]);
        assert_eq!(*sim.calculate("tax_unit_capital_gains", year).unwrap(), vec![350.0, 75.0]);
    }

    #[test]
    fn test_missing_parameter_surfaces_with_chain() {
        let year = Period::year(2023);
        let sim = Simulation::new(
            Arc::new(registry().unwrap()),
            Arc::new(households(vec![0], 1).unwrap()),
            Arc::new(crate::parameters::ParameterTree::default()),
        )
        .unwrap();
        let err = sim.calculate("ptax_ss_was", year).unwrap_err();
        assert!(matches!(err.root_cause(), ComputationError::ParameterNotFound { .. }));
        assert_eq!(err.chain(), vec!["ptax_ss_was@2023".to_string()]);
    }
}
