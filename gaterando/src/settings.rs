use serde_derive::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RandomizerSettings {
    /// Name of the area all reachability is judged from.
    pub start_area: String,
    /// Area that should land early in the dependency order, if any.
    #[serde(default)]
    pub early_checkpoint: Option<String>,
    #[serde(default = "default_early_checkpoint_max_tier")]
    pub early_checkpoint_max_tier: usize,
    #[serde(default = "default_core_retry_limit")]
    pub core_retry_limit: usize,
    #[serde(default = "default_general_retry_limit")]
    pub general_retry_limit: usize,
    /// Stable-matching scores below this trigger entrance duplication.
    #[serde(default = "default_stable_match_threshold")]
    pub stable_match_threshold: i32,
}

fn default_early_checkpoint_max_tier() -> usize {
    2
}

fn default_core_retry_limit() -> usize {
    1000
}

fn default_general_retry_limit() -> usize {
    100
}

fn default_stable_match_threshold() -> i32 {
    -8
}

impl RandomizerSettings {
    pub fn new(start_area: &str) -> Self {
        RandomizerSettings {
            start_area: start_area.to_string(),
            early_checkpoint: None,
            early_checkpoint_max_tier: default_early_checkpoint_max_tier(),
            core_retry_limit: default_core_retry_limit(),
            general_retry_limit: default_general_retry_limit(),
            stable_match_threshold: default_stable_match_threshold(),
        }
    }
}
