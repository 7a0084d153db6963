use super::TAX_UNIT;
use crate::compute::kernel::{le, max_, min_, sub, where_};
use crate::compute::ComputationError;
use crate::store::{VariableDefinition, VariableRegistry};

const UI: &str = "benefit.unemployment_insurance.exemption";

pub fn register(reg: &mut VariableRegistry) -> Result<(), ComputationError> {
    reg.register(
        VariableDefinition::formula("pre_qbid_taxinc", TAX_UNIT, |scope, period, params| {
            let exemption = params.at(period).child(UI)?;
            let ui_amount = scope.calc("filer_e02300", period)?;
            let agi_over_ui = sub(&scope.calc("c00100", period)?, &ui_amount)?;
            let mars = scope.calc("mars", period)?;
            let cutoff = exemption.by_category("cutoff", &mars, &scope.labels("mars")?)?;
            where_(
                &le(&agi_over_ui, &cutoff)?,
                &min_(&ui_amount, exemption.value("amount")?)?,
                0.0,
            )
        })
        .label("Taxable income (pre-QBID)")
        .depends_on(["filer_e02300", "c00100", "mars"]),
    )?;

    reg.register(
        VariableDefinition::formula("posagi", TAX_UNIT, |scope, period, _| max_(&scope.calc("c00100", period)?, 0.0))
            .label("Positive AGI")
            .unit("currency-USD")
            .documentation("Negative AGI values capped at zero")
            .depends_on(["c00100"]),
    )?;

    reg.register(
        VariableDefinition::sum_of("tax_unit_capital_gains", TAX_UNIT, ["capital_gains"])
            .label("Tax unit capital gains")
            .unit("currency-USD"),
    )?;
    Ok(())
}
