use serde::{Deserialize, Serialize};

/// Index of an entity kind within an `EntityGraph`. The person entity is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntityId(pub u16);

impl EntityId {
    pub const PERSON: EntityId = EntityId(0);

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
    pub fn new(idx: usize) -> Self {
        Self(idx as u16)
    }
}

/// A category of simulated record with its own variable namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityKind {
    /// Key used by variable definitions, e.g. `"tax_unit"`.
    pub key: String,
    pub plural: String,
    #[serde(default)]
    pub label: String,
}

impl EntityKind {
    pub fn new(key: impl Into<String>, plural: impl Into<String>) -> Self {
        Self { key: key.into(), plural: plural.into(), label: String::new() }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
