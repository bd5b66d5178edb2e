//! Configuration model and discovery for convoke
//!
//! Configuration is hierarchical: explicit file path > `CONVOKE_CONFIG`
//! environment variable > `./convoke.toml` > built-in defaults. Every
//! section has sensible defaults so a missing config file is a valid
//! (stub-provider) configuration.
//!
//! Token budgets are a configuration *input*: the per-scenario numbers
//! are produced by an external tuning procedure and consumed here, never
//! recomputed by the core.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default env var holding the comma-separated credential pool.
pub const DEFAULT_API_KEYS_ENV: &str = "CONVOKE_API_KEYS";

/// Config file name searched for in the working directory.
pub const CONFIG_FILE_NAME: &str = "convoke.toml";

/// Env var naming an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "CONVOKE_CONFIG";

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Credential pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Env var read for the comma-separated key list.
    #[serde(default = "default_api_keys_env")]
    pub api_keys_env: String,
    /// Base cooldown window after a retryable failure, in seconds.
    #[serde(default = "default_cooldown_base_secs")]
    pub cooldown_base_secs: u64,
    /// Upper bound on the doubling cooldown window, in seconds.
    #[serde(default = "default_cooldown_cap_secs")]
    pub cooldown_cap_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            api_keys_env: default_api_keys_env(),
            cooldown_base_secs: default_cooldown_base_secs(),
            cooldown_cap_secs: default_cooldown_cap_secs(),
        }
    }
}

/// Call executor retry and timeout policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Attempts per call before the failure escapes the executor.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Hard timeout per backend invocation, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Base for the jittered exponential backoff between attempts, in ms.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// How many times to re-try `acquire` before `CapacityExhausted`.
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,
    /// Base wait between acquire attempts, in ms (jittered).
    #[serde(default = "default_acquire_wait_ms")]
    pub acquire_wait_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            call_timeout_secs: default_call_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            acquire_attempts: default_acquire_attempts(),
            acquire_wait_ms: default_acquire_wait_ms(),
        }
    }
}

/// Worker pool and merge settings for the drafting stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftingConfig {
    /// Number of concurrent drafting workers.
    #[serde(default = "default_width")]
    pub width: usize,
    /// Floor on a worker call's output token budget.
    #[serde(default = "default_worker_token_floor")]
    pub worker_token_floor: u32,
    /// Share of the scenario budget each worker call gets.
    #[serde(default = "default_worker_token_share")]
    pub worker_token_share: f64,
    /// Floor on the merge call's output token budget.
    #[serde(default = "default_merge_token_floor")]
    pub merge_token_floor: u32,
    /// Share of the scenario budget the merge call gets.
    #[serde(default = "default_merge_token_share")]
    pub merge_token_share: f64,
    /// Token budget for the single schema-repair retry of a call.
    #[serde(default = "default_repair_max_tokens")]
    pub repair_max_tokens: u32,
}

impl DraftingConfig {
    /// Output token budget for one drafting worker call.
    #[must_use]
    pub fn worker_tokens(&self, scenario_budget: u32) -> u32 {
        let share = (f64::from(scenario_budget) * self.worker_token_share) as u32;
        share.max(self.worker_token_floor)
    }

    /// Output token budget for the merge call.
    #[must_use]
    pub fn merge_tokens(&self, scenario_budget: u32) -> u32 {
        let share = (f64::from(scenario_budget) * self.merge_token_share) as u32;
        share.max(self.merge_token_floor)
    }
}

impl Default for DraftingConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            worker_token_floor: default_worker_token_floor(),
            worker_token_share: default_worker_token_share(),
            merge_token_floor: default_merge_token_floor(),
            merge_token_share: default_merge_token_share(),
            repair_max_tokens: default_repair_max_tokens(),
        }
    }
}

/// Approval gate policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Plans whose every action meets this confidence auto-approve.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Automatic replans permitted after gate rejection before `Failed`.
    #[serde(default = "default_max_plan_retries")]
    pub max_plan_retries: u32,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_plan_retries: default_max_plan_retries(),
        }
    }
}

/// Model provider selection and parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name: `"http"` or `"stub"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL override for the HTTP provider.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model name sent to the provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature for drafting calls.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            temperature: default_temperature(),
        }
    }
}

/// Per-scenario token budgets, produced by the external tuning tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetsConfig {
    /// Budget for scenarios not listed in `scenarios`.
    #[serde(default = "default_budget")]
    pub default_tokens: u32,
    /// Recommended budget per scenario id.
    #[serde(default)]
    pub scenarios: HashMap<String, u32>,
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        Self {
            default_tokens: default_budget(),
            scenarios: HashMap::new(),
        }
    }
}

/// Top-level configuration for a convoke process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub drafting: DraftingConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub budgets: BudgetsConfig,
}

impl Config {
    /// Load and validate configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read,
    /// `ConfigError::Parse` if it is not valid TOML for this model, and
    /// `ConfigError::Invalid` if validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Discover configuration: `CONVOKE_CONFIG` path if set, else
    /// `./convoke.toml` if present, else built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error only when a discovered file exists but cannot be
    /// read, parsed, or validated. A missing file is not an error.
    pub fn discover() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            debug!(path = %path, "Loading config from {}", CONFIG_PATH_ENV);
            return Self::load(Path::new(&path));
        }

        let local = Path::new(CONFIG_FILE_NAME);
        if local.exists() {
            debug!(path = %local.display(), "Loading config from working directory");
            return Self::load(local);
        }

        debug!("No config file found, using built-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drafting.width == 0 {
            return Err(ConfigError::Invalid("drafting.width must be >= 1".into()));
        }
        if self.executor.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "executor.max_retries must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.approval.confidence_threshold) {
            return Err(ConfigError::Invalid(
                "approval.confidence_threshold must be within [0, 1]".into(),
            ));
        }
        if self.credentials.cooldown_cap_secs < self.credentials.cooldown_base_secs {
            return Err(ConfigError::Invalid(
                "credentials.cooldown_cap_secs must be >= cooldown_base_secs".into(),
            ));
        }
        Ok(())
    }

    /// Recommended token budget for a scenario, falling back to the
    /// default when the scenario is not listed.
    #[must_use]
    pub fn budget_for_scenario(&self, scenario_id: &str) -> u32 {
        self.budgets
            .scenarios
            .get(scenario_id)
            .copied()
            .unwrap_or(self.budgets.default_tokens)
    }

    /// Minimal configuration for tests: stub provider, tiny waits.
    #[must_use]
    pub fn minimal_for_testing() -> Self {
        let mut config = Self::default();
        config.provider.provider = "stub".to_string();
        config.executor.backoff_base_ms = 1;
        config.executor.acquire_wait_ms = 1;
        config
    }
}

fn default_api_keys_env() -> String {
    DEFAULT_API_KEYS_ENV.to_string()
}
fn default_cooldown_base_secs() -> u64 {
    30
}
fn default_cooldown_cap_secs() -> u64 {
    480
}
fn default_max_retries() -> u32 {
    4
}
fn default_call_timeout_secs() -> u64 {
    60
}
fn default_backoff_base_ms() -> u64 {
    800
}
fn default_acquire_attempts() -> u32 {
    5
}
fn default_acquire_wait_ms() -> u64 {
    250
}
fn default_width() -> usize {
    3
}
fn default_worker_token_floor() -> u32 {
    200
}
fn default_worker_token_share() -> f64 {
    0.20
}
fn default_merge_token_floor() -> u32 {
    300
}
fn default_merge_token_share() -> f64 {
    0.30
}
fn default_repair_max_tokens() -> u32 {
    200
}
fn default_confidence_threshold() -> f64 {
    0.75
}
fn default_max_plan_retries() -> u32 {
    1
}
fn default_provider() -> String {
    "http".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_budget() -> u32 {
    400
}
