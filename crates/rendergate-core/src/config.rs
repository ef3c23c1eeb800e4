use std::path::Path;

use anyhow::{Context, Result};
use config as cfg;
use serde::{Deserialize, Serialize};

/// Retry ceilings and gate thresholds. These are policy knobs, not
/// correctness requirements; tests and deployments override them freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Hard ceiling on generation attempts per output unit.
    #[serde(default = "PolicyConfig::default_max_attempts_per_unit")]
    pub max_attempts_per_unit: u32,
    /// Supervisor retry budget per step.
    #[serde(default = "PolicyConfig::default_step_retry_budget")]
    pub step_retry_budget: u32,
    /// Supervisor retry budget per run.
    #[serde(default = "PolicyConfig::default_run_retry_budget")]
    pub run_retry_budget: u32,
    /// Minimum consistency score the supervisor accepts.
    #[serde(default = "PolicyConfig::default_consistency_threshold")]
    pub consistency_threshold: f32,
    /// Bounded fan-out window for independent unit groups.
    #[serde(default = "PolicyConfig::default_concurrency_window")]
    pub concurrency_window: usize,
    /// Human-correction repetitions before a reason is promoted into a
    /// calibration policy rule.
    #[serde(default = "PolicyConfig::default_rule_promotion_support")]
    pub rule_promotion_support: u32,
}

impl PolicyConfig {
    fn default_max_attempts_per_unit() -> u32 {
        5
    }
    fn default_step_retry_budget() -> u32 {
        3
    }
    fn default_run_retry_budget() -> u32 {
        10
    }
    fn default_consistency_threshold() -> f32 {
        0.7
    }
    fn default_concurrency_window() -> usize {
        3
    }
    fn default_rule_promotion_support() -> u32 {
        3
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_unit: Self::default_max_attempts_per_unit(),
            step_retry_budget: Self::default_step_retry_budget(),
            run_retry_budget: Self::default_run_retry_budget(),
            consistency_threshold: Self::default_consistency_threshold(),
            concurrency_window: Self::default_concurrency_window(),
            rule_promotion_support: Self::default_rule_promotion_support(),
        }
    }
}

/// Connection settings for the external model endpoint family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "ProviderConfig::default_base_url")]
    pub base_url: String,
    /// Read from the environment when absent from the file.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "ProviderConfig::default_generation_model")]
    pub generation_model: String,
    #[serde(default = "ProviderConfig::default_judge_model")]
    pub judge_model: String,
    /// Secondary judgment model used after a primary failure.
    #[serde(default = "ProviderConfig::default_judge_fallback_model")]
    pub judge_fallback_model: String,
    #[serde(default = "ProviderConfig::default_audit_model")]
    pub audit_model: String,
    #[serde(default = "ProviderConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "ProviderConfig::default_max_retries")]
    pub max_retries: u32,
}

impl ProviderConfig {
    fn default_base_url() -> String {
        "http://localhost:8080/v1".to_string()
    }
    fn default_generation_model() -> String {
        "render-diffusion-xl".to_string()
    }
    fn default_judge_model() -> String {
        "vision-judge-large".to_string()
    }
    fn default_judge_fallback_model() -> String {
        "vision-judge-mini".to_string()
    }
    fn default_audit_model() -> String {
        "audit-llm".to_string()
    }
    fn default_timeout_secs() -> u64 {
        120
    }
    fn default_max_retries() -> u32 {
        3
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            api_key: std::env::var("RENDERGATE_API_KEY").ok(),
            generation_model: Self::default_generation_model(),
            judge_model: Self::default_judge_model(),
            judge_fallback_model: Self::default_judge_fallback_model(),
            audit_model: Self::default_audit_model(),
            timeout_secs: Self::default_timeout_secs(),
            max_retries: Self::default_max_retries(),
        }
    }
}

/// Per-call deadlines for the async boundaries. Timeouts surface as
/// judgment/audit failures, never as silent hangs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "TimeoutConfig::default_generation_secs")]
    pub generation_secs: u64,
    #[serde(default = "TimeoutConfig::default_judgment_secs")]
    pub judgment_secs: u64,
    #[serde(default = "TimeoutConfig::default_audit_secs")]
    pub audit_secs: u64,
}

impl TimeoutConfig {
    fn default_generation_secs() -> u64 {
        180
    }
    fn default_judgment_secs() -> u64 {
        60
    }
    fn default_audit_secs() -> u64 {
        60
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            generation_secs: Self::default_generation_secs(),
            judgment_secs: Self::default_judgment_secs(),
            audit_secs: Self::default_audit_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl EngineConfig {
    /// Layered load: built-in defaults, then an optional TOML file, then
    /// `RENDERGATE_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = cfg::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(cfg::File::from(path).required(true));
        }

        builder = builder.add_source(
            cfg::Environment::with_prefix("RENDERGATE")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .context("failed to assemble configuration sources")?;

        settings
            .try_deserialize::<EngineConfig>()
            .context("failed to deserialize engine configuration")
    }
}
