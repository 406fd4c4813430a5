use serde::{Deserialize, Serialize};
use xslvm_xslt::EngineConfig;

/// Settings for a whole [`Transformation`](crate::Transformation) run.
///
/// ```json
/// { "engine": { "slice_budget": 500 }, "max_slices": 10000 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub engine: EngineConfig,
    /// Upper bound on slices a single `run` call executes. `None` runs until the
    /// transformation finishes or blocks.
    pub max_slices: Option<usize>,
}

impl TransformConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_max_slices(mut self, max_slices: usize) -> Self {
        self.max_slices = Some(max_slices);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = TransformConfig::from_json_str(r#"{ "engine": { "slice_budget": 250 } }"#)
            .expect("valid config");
        assert_eq!(config.engine.slice_budget, 250);
        assert_eq!(
            config.engine.max_recursion_depth,
            EngineConfig::default().max_recursion_depth
        );
        assert_eq!(config.max_slices, None);
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(TransformConfig::from_json_str("{ engine: }").is_err());
    }
}
