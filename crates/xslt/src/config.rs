//! Tuning knobs for the execution engine.

use serde::{Deserialize, Serialize};

/// Configuration for an [`Engine`](crate::engine::Engine) run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cost units one call to `run_slice` may spend before yielding. Every executed
    /// instruction costs one unit; evaluator work is charged as reported.
    pub slice_budget: i64,
    /// Maximum number of live execution frames. Exceeding it is a fatal error.
    pub max_recursion_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slice_budget: 10_000,
            max_recursion_depth: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn with_slice_budget(mut self, slice_budget: i64) -> Self {
        self.slice_budget = slice_budget.max(1);
        self
    }

    pub fn with_max_recursion_depth(mut self, max_recursion_depth: usize) -> Self {
        self.max_recursion_depth = max_recursion_depth.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_clamps_to_at_least_one() {
        let config = EngineConfig::default()
            .with_slice_budget(0)
            .with_max_recursion_depth(0);
        assert_eq!(config.slice_budget, 1);
        assert_eq!(config.max_recursion_depth, 1);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "slice_budget": 50 }"#).unwrap();
        assert_eq!(config.slice_budget, 50);
        assert_eq!(config.max_recursion_depth, EngineConfig::default().max_recursion_depth);
    }
}
