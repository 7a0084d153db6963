use crate::compute::{ComputationError, Scope};
use crate::parameters::ParameterTree;
use crate::period::{Granularity, Period};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct VariableId(pub u32);

impl VariableId {
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
    pub fn new(idx: usize) -> Self {
        Self(idx as u32)
    }
}

/// Storage type of a variable. Every value is carried as `f64`: booleans as
/// 0/1, categories as an index into their label list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Float,
    Bool,
    Category(Arc<[String]>),
}

impl ValueType {
    pub fn category<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueType::Category(labels.into_iter().map(Into::into).collect())
    }

    pub fn labels(&self) -> Option<&[String]> {
        match self {
            ValueType::Category(labels) => Some(labels),
            _ => None,
        }
    }
}

/// How a variable answers a request for a period of a different granularity
/// than its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reconciliation {
    /// Fail with `GranularityMismatch`.
    #[default]
    Reject,
    /// Flow quantity: a year is the sum of its months, a month is a twelfth of its year.
    Split,
    /// Stock or eligibility quantity: a month takes its year's value, a year
    /// takes its first month's value.
    HoldConstant,
}

pub type FormulaFn =
    dyn Fn(&Scope<'_>, Period, &ParameterTree) -> Result<Vec<f64>, ComputationError> + Send + Sync;

/// A pure function of (entity accessor, period, parameters) returning one value per record.
#[derive(Clone)]
pub struct Formula(Arc<FormulaFn>);

impl Formula {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Scope<'_>, Period, &ParameterTree) -> Result<Vec<f64>, ComputationError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    #[inline]
    pub(crate) fn call(&self, scope: &Scope<'_>, period: Period, parameters: &ParameterTree) -> Result<Vec<f64>, ComputationError> {
        (self.0)(scope, period, parameters)
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Formula(..)")
    }
}

#[derive(Debug, Clone)]
pub enum VariableKind {
    /// Raw input data; records without data take `default`.
    Input { default: f64 },
    Formula(Formula),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableMetadata {
    pub name: String,
    pub label: Option<String>,
    pub unit: Option<String>,
    pub documentation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VariableDefinition {
    pub meta: VariableMetadata,
    /// Key of the home entity, e.g. `"person"`.
    pub entity: String,
    pub value_type: ValueType,
    pub granularity: Granularity,
    pub reconciliation: Reconciliation,
    pub kind: VariableKind,
    /// Names the formula reads. Declared so the dependency graph can be
    /// analysed without running anything.
    pub dependencies: Vec<String>,
}

impl VariableDefinition {
    fn base(name: impl Into<String>, entity: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            meta: VariableMetadata { name: name.into(), ..Default::default() },
            entity: entity.into(),
            value_type: ValueType::Float,
            granularity: Granularity::Year,
            reconciliation: Reconciliation::Reject,
            kind,
            dependencies: Vec::new(),
        }
    }

    pub fn input(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::base(name, entity, VariableKind::Input { default: 0.0 })
    }

    pub fn formula<F>(name: impl Into<String>, entity: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Scope<'_>, Period, &ParameterTree) -> Result<Vec<f64>, ComputationError> + Send + Sync + 'static,
    {
        Self::base(name, entity, VariableKind::Formula(Formula::new(f)))
    }

    /// A formula summing the named variables; person variables are summed
    /// across members when the home entity is a group.
    pub fn sum_of<I, S>(name: impl Into<String>, entity: impl Into<String>, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = variables.into_iter().map(Into::into).collect();
        let mut def = Self::base(name, entity, VariableKind::Formula(crate::compute::aggregate::sum_of_variables(names.clone())));
        def.dependencies = names;
        def
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, VariableKind::Input { .. })
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.meta.label = Some(label.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.meta.unit = Some(unit.into());
        self
    }

    pub fn documentation(mut self, doc: impl Into<String>) -> Self {
        self.meta.documentation = Some(doc.into());
        self
    }

    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn reconciliation(mut self, reconciliation: Reconciliation) -> Self {
        self.reconciliation = reconciliation;
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    /// Default for records of an input variable without data. Ignored for formulas.
    pub fn default_value(mut self, value: f64) -> Self {
        if let VariableKind::Input { default } = &mut self.kind {
            *default = value;
        }
        self
    }

    /// Checks a value against the declared type, returning its normalised form.
    pub(crate) fn coerce(&self, index: usize, value: f64) -> Result<f64, ComputationError> {
        let invalid = |reason: String| ComputationError::InvalidValue { variable: self.meta.name.clone(), index, reason };
        match &self.value_type {
            ValueType::Float => Ok(value),
            ValueType::Bool if value.is_nan() => Err(invalid("NaN is not a boolean".into())),
            ValueType::Bool => Ok(if value != 0.0 { 1.0 } else { 0.0 }),
            ValueType::Category(labels) => {
                if value >= 0.0 && value.fract() == 0.0 && (value as usize) < labels.len() {
                    Ok(value)
                } else {
                    Err(invalid(format!("{value} is not a code among {} categories", labels.len())))
                }
            }
        }
    }
}
