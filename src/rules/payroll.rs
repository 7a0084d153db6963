//! FICA and SECA payroll taxes.

use super::{PERSON, TAX_UNIT};
use crate::compute::aggregate::{self, DEPENDENT_FLAG};
use crate::compute::kernel::{add, max_, min_, mul, not_, sub};
use crate::compute::ComputationError;
use crate::store::{VariableDefinition, VariableRegistry};

const SS: &str = "tax.payroll.fica.social_security";
const MC_RATE: &str = "tax.payroll.fica.medicare.tax_rate";
const EMPLOYER_SHARE: &str = "tax.ald.misc.employer_share";

/// Tax unit total of a person variable over non-dependent members.
fn filer_total(name: &str, source: &'static str, label: &str) -> VariableDefinition {
    VariableDefinition::formula(name, TAX_UNIT, move |scope, period, _| aggregate::non_dependent_sum(scope, source, period))
        .label(label)
        .depends_on([source, DEPENDENT_FLAG])
}

pub fn register(reg: &mut VariableRegistry) -> Result<(), ComputationError> {
    reg.register(
        VariableDefinition::formula("gross_was", PERSON, |scope, period, _| {
            aggregate::add(scope, period, &["e00200", "pencon"])
        })
        .label("Gross wage and salary")
        .depends_on(["e00200", "pencon"]),
    )?;

    reg.register(
        VariableDefinition::formula("txearn_was", PERSON, |scope, period, params| {
            let cap = params.at(period).child(SS)?.value("max_taxable_earnings")?;
            min_(cap, &scope.calc("gross_was", period)?)
        })
        .label("Taxable gross earnings for OASDI FICA")
        .depends_on(["gross_was"]),
    )?;

    reg.register(
        VariableDefinition::formula("ptax_ss_was", PERSON, |scope, period, params| {
            let rate = params.at(period).child(SS)?.value("tax_rate")?;
            mul(rate, &scope.calc("txearn_was", period)?)
        })
        .label("OASDI payroll tax on wage income")
        .depends_on(["txearn_was"]),
    )?;
    reg.register(filer_total(
        "filer_ptax_ss_was",
        "ptax_ss_was",
        "OASDI payroll tax on wage income for the tax unit (excluding dependents)",
    ))?;

    reg.register(
        VariableDefinition::formula("ptax_mc_was", PERSON, |scope, period, params| {
            let rate = params.get(MC_RATE, period)?;
            mul(rate, &scope.calc("gross_was", period)?)
        })
        .label("HI payroll tax on wage income")
        .depends_on(["gross_was"]),
    )?;
    reg.register(filer_total(
        "filer_ptax_mc_was",
        "ptax_mc_was",
        "HI payroll tax on wage income for the tax unit (excluding dependents)",
    ))?;

    reg.register(
        VariableDefinition::formula("sey_frac", TAX_UNIT, |scope, period, params| {
            let p = params.at(period);
            let combined = p.child(SS)?.value("tax_rate")? + p.value(MC_RATE)?;
            Ok(scope.filled(1.0 - p.value(EMPLOYER_SHARE)? * combined))
        })
        .label("Taxable fraction of self-employment income"),
    )?;

    reg.register(
        VariableDefinition::formula("txearn_sey", PERSON, |scope, period, params| {
            let cap = params.at(period).child(SS)?.value("max_taxable_earnings")?;
            let taxable = mul(&scope.calc("sey", period)?, &scope.group(TAX_UNIT, "sey_frac", period)?)?;
            let room = sub(cap, &scope.calc("txearn_was", period)?)?;
            min_(&max_(0.0, &taxable)?, &room)
        })
        .label("Taxable self-employment income")
        .depends_on(["sey", "sey_frac", "txearn_was"]),
    )?;

    reg.register(
        VariableDefinition::formula("setax_ss", PERSON, |scope, period, params| {
            let rate = params.at(period).child(SS)?.value("tax_rate")?;
            mul(rate, &scope.calc("txearn_sey", period)?)
        })
        .label("SECA self-employment SS tax")
        .depends_on(["txearn_sey"]),
    )?;
    reg.register(filer_total(
        "filer_setax_ss",
        "setax_ss",
        "SECA self-employment SS tax for the tax unit (excluding dependents)",
    ))?;

    reg.register(
        VariableDefinition::formula("setax_mc", PERSON, |scope, period, params| {
            let rate = params.get(MC_RATE, period)?;
            let base = mul(&scope.calc("sey", period)?, &scope.group(TAX_UNIT, "sey_frac", period)?)?;
            mul(rate, &max_(0.0, &base)?)
        })
        .label("SECA self-employment SS tax (Medicare)")
        .depends_on(["sey", "sey_frac"]),
    )?;

    reg.register(
        VariableDefinition::formula("setax", PERSON, |scope, period, _| {
            aggregate::add(scope, period, &["setax_ss", "setax_mc"])
        })
        .label("Self-employment payroll tax")
        .depends_on(["setax_ss", "setax_mc"]),
    )?;

    reg.register(
        VariableDefinition::formula("sey_frac_for_extra_oasdi", TAX_UNIT, |scope, period, params| {
            let p = params.at(period);
            Ok(scope.filled(1.0 - p.value(EMPLOYER_SHARE)? * p.child(SS)?.value("tax_rate")?))
        })
        .label("Taxable fraction of self-employment income for extra OASDI payroll taxes"),
    )?;

    reg.register(
        VariableDefinition::formula("was_plus_sey", PERSON, |scope, period, _| {
            let sey = mul(
                &scope.calc("sey", period)?,
                &scope.group(TAX_UNIT, "sey_frac_for_extra_oasdi", period)?,
            )?;
            add(&scope.calc("gross_was", period)?, &max_(0.0, &sey)?)
        })
        .label("Wage and self-employment earnings subject to extra OASDI tax")
        .depends_on(["gross_was", "sey", "sey_frac_for_extra_oasdi"]),
    )?;

    reg.register(
        VariableDefinition::formula("extra_payrolltax", TAX_UNIT, |scope, period, params| {
            let ss = params.at(period).child(SS)?;
            let above = sub(&scope.members("was_plus_sey", period)?, ss.value("add_taxable_earnings")?)?;
            let taxed = mul(&max_(0.0, &above)?, ss.value("tax_rate")?)?;
            scope.sum_where(&taxed, &not_(&scope.members(DEPENDENT_FLAG, period)?))
        })
        .label("Extra payroll tax")
        .depends_on(["was_plus_sey", DEPENDENT_FLAG]),
    )?;
    Ok(())
}
