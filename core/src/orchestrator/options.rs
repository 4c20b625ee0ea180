use serde::{Deserialize, Serialize};

use super::normalize::NormalizationRules;

/// How successful tool results are turned into narration calls
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NarrationMode {
    /// One streaming call per result, in invocation order
    #[default]
    PerResult,
    /// One streaming call for all results together
    Combined,
}

/// Session behaviour knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorOptions {
    pub narration: NarrationMode,
    /// When false, results are summarized locally instead of by the model
    pub narrate_with_model: bool,
    pub normalization: NormalizationRules,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            narration: NarrationMode::PerResult,
            narrate_with_model: true,
            normalization: NormalizationRules::default(),
        }
    }
}
