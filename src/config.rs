//! Engine configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Evaluate independent requests of a batch on the rayon pool.
    pub parallel: bool,
    /// Fail, rather than warn, when a formula reads a variable it did not declare.
    pub strict_dependencies: bool,
    /// Maximum nesting of dependency resolution before giving up. Every level
    /// costs several native frames, so the default stays well inside the
    /// 2 MiB stack of spawned and rayon threads, unoptimized builds included.
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { parallel: true, strict_dependencies: false, max_depth: 64 }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
