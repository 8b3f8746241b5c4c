use crate::errors::EngineError;
use crate::types::AgentKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration, stored as TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub locking: LockingConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub cancellation: CancellationConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Minimum confidence for an agent answer to be returned as-is
    pub confidence_threshold: f64,
    /// Per-agent overrides keyed by agent name (e.g. "diagnosis")
    pub agent_thresholds: BTreeMap<String, f64>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            agent_thresholds: BTreeMap::new(),
        }
    }
}

impl RoutingConfig {
    pub fn threshold_for(&self, agent: AgentKind) -> f64 {
        self.agent_thresholds
            .get(agent.as_str())
            .copied()
            .unwrap_or(self.confidence_threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, first try included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// Non-idempotent tools confirmed safe to retry
    pub confirmed_tools: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter: true,
            confirmed_tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicyKind {
    /// Wait for the turn lock up to `wait_timeout_ms`
    Block,
    /// Fail immediately when another turn is in progress
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    pub policy: LockPolicyKind,
    pub wait_timeout_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            policy: LockPolicyKind::Block,
            wait_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for one agent attempt
    pub agent_ms: u64,
    /// Deadline for one tool attempt
    pub tool_default_ms: u64,
    /// Per-tool overrides keyed by tool id
    pub tools: BTreeMap<String, u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            agent_ms: 30_000,
            tool_default_ms: 10_000,
            tools: BTreeMap::new(),
        }
    }
}

impl TimeoutConfig {
    pub fn agent(&self) -> Duration {
        Duration::from_millis(self.agent_ms)
    }

    pub fn tool(&self, tool_id: &str) -> Duration {
        Duration::from_millis(
            self.tools
                .get(tool_id)
                .copied()
                .unwrap_or(self.tool_default_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open a tool's circuit
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Consensus members allowed to run at once
    pub max_parallel: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self { max_parallel: 3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Cancelled turn fails the consultation
    Fail,
    /// Cancelled turn flags the consultation for human review
    HumanReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CancellationConfig {
    pub policy: CancelPolicy,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            policy: CancelPolicy::HumanReview,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Deterministic offline reasoning
    Template,
    /// Local Ollama server
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub url: String,
    pub model: String,
    /// Confidence reported by the template backend
    pub template_confidence: f64,
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Template,
            url: "http://127.0.0.1:11434".to_string(),
            model: "qwen2.5:7b-instruct".to_string(),
            template_confidence: 0.8,
            request_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory of the JSON store; defaults to ~/.careflow/store
    pub dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = EngineConfig::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: EngineConfig =
            toml::from_str(&contents).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("config.toml"))
    }

    /// Resolved store directory
    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::home_dir()?.join("store")),
        }
    }

    fn home_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".careflow"))
    }

    /// Reject values the engine cannot operate with
    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        let thresholds = std::iter::once(("default", self.routing.confidence_threshold)).chain(
            self.routing
                .agent_thresholds
                .iter()
                .map(|(k, v)| (k.as_str(), *v)),
        );
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "confidence threshold for {} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        for name in self.routing.agent_thresholds.keys() {
            if AgentKind::parse(name).is_none() {
                return Err(EngineError::Config(format!("unknown agent '{}'", name)));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(EngineError::Config(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.fanout.max_parallel == 0 {
            return Err(EngineError::Config(
                "fanout.max_parallel must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backend.template_confidence) {
            return Err(EngineError::Config(
                "backend.template_confidence must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
