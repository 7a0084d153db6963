use super::{PERSON, TAX_UNIT};
use crate::compute::aggregate::DEPENDENT_FLAG;
use crate::compute::ComputationError;
use crate::store::{ValueType, VariableDefinition, VariableRegistry};

/// Filing status labels, in code order.
pub const MARS: [&str; 5] = ["SINGLE", "JOINT", "SEPARATE", "HEAD_OF_HOUSEHOLD", "WIDOW"];

const USD: &str = "currency-USD";

pub fn register(reg: &mut VariableRegistry) -> Result<(), ComputationError> {
    reg.register(VariableDefinition::input("e00200", PERSON).label("Wages, salaries, and tips").unit(USD))?;
    reg.register(VariableDefinition::input("pencon", PERSON).label("Pension contributions").unit(USD))?;
    reg.register(VariableDefinition::input("sey", PERSON).label("Self-employment income").unit(USD))?;
    reg.register(VariableDefinition::input("capital_gains", PERSON).label("Capital gains").unit(USD))?;
    reg.register(
        VariableDefinition::input("social_security_dependents", PERSON)
            .label("Social Security dependents benefits")
            .documentation("Social Security dependents benefits")
            .unit(USD),
    )?;
    reg.register(
        VariableDefinition::input(DEPENDENT_FLAG, PERSON)
            .label("Is a dependent in the tax unit")
            .value_type(ValueType::Bool),
    )?;
    reg.register(VariableDefinition::input("filer_e02300", TAX_UNIT).label("Unemployment compensation").unit(USD))?;
    reg.register(VariableDefinition::input("c00100", TAX_UNIT).label("Adjusted gross income").unit(USD))?;
    reg.register(
        VariableDefinition::input("mars", TAX_UNIT)
            .label("Marital status for the tax unit")
            .value_type(ValueType::category(MARS)),
    )?;
    Ok(())
}
