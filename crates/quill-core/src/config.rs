use std::path::Path;

use serde::{Deserialize, Serialize};

use quill_tools::FilterMode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing environment variable {0}")]
    MissingEnv(String),
}

/// How dangerous tool calls are gated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Dangerous tools run without confirmation.
    Auto,
    /// Dangerous tools require explicit approval.
    #[default]
    Manual,
    /// No tools run at all.
    Disabled,
}

/// Outcome of the tool gate, checked before every execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDecision {
    Allow,
    Deny { reason: String },
    RequireApproval,
}

fn default_max_iterations() -> usize {
    10
}

fn default_enable_tools() -> bool {
    true
}

fn default_iteration_timeout_secs() -> u64 {
    300
}

fn default_tool_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub approval_mode: ApprovalMode,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_enable_tools")]
    pub enable_tools: bool,
    /// When set, only the named tools may run.
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    /// Tools that may never run, regardless of the allow list.
    #[serde(default)]
    pub blocked_tools: Option<Vec<String>>,
    #[serde(default = "default_iteration_timeout_secs")]
    pub iteration_timeout_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::Manual,
            max_iterations: default_max_iterations(),
            enable_tools: default_enable_tools(),
            allowed_tools: None,
            blocked_tools: None,
            iteration_timeout_secs: default_iteration_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl AgentConfig {
    /// Decide whether a named tool may run. The checks are ordered: the
    /// global switch, then the approval mode, then the block list, then the
    /// allow list, and only then the dangerous-tool gate.
    #[must_use]
    pub fn is_tool_allowed(&self, name: &str, dangerous: bool) -> ToolDecision {
        if !self.enable_tools {
            return ToolDecision::Deny {
                reason: "tools are disabled".into(),
            };
        }
        if self.approval_mode == ApprovalMode::Disabled {
            return ToolDecision::Deny {
                reason: "tool execution is disabled".into(),
            };
        }
        if let Some(blocked) = &self.blocked_tools
            && blocked.iter().any(|t| t == name)
        {
            return ToolDecision::Deny {
                reason: format!("tool '{name}' is blocked"),
            };
        }
        if let Some(allowed) = &self.allowed_tools
            && !allowed.iter().any(|t| t == name)
        {
            return ToolDecision::Deny {
                reason: format!("tool '{name}' is not in the allowed list"),
            };
        }
        if dangerous && self.approval_mode == ApprovalMode::Manual {
            return ToolDecision::RequireApproval;
        }
        ToolDecision::Allow
    }
}

/// LLM provider backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    Compatible,
}

fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Display name; defaults to the kind's name.
    #[serde(default)]
    pub name: Option<String>,
    pub model: String,
    /// Required for `compatible`, ignored for `claude`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub context_window: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub filter_mode: FilterMode,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub no_access_paths: Vec<String>,
    #[serde(default)]
    pub read_only_paths: Vec<String>,
}

fn default_compact_threshold() -> f64 {
    0.70
}

fn default_handoff_threshold() -> f64 {
    0.85
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold: f64,
    #[serde(default = "default_handoff_threshold")]
    pub handoff_threshold: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            compact_threshold: default_compact_threshold(),
            handoff_threshold: default_handoff_threshold(),
        }
    }
}

fn default_max_daily_cents() -> f64 {
    100.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CostConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_daily_cents")]
    pub max_daily_cents: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_daily_cents: default_max_daily_cents(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub cost: CostConfig,
}

impl Config {
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Resolve a provider's API key from its configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnv` when the variable is named but unset.
    pub fn resolve_api_key(provider: &ProviderConfig) -> Result<Option<String>, ConfigError> {
        match &provider.api_key_env {
            None => Ok(None),
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| ConfigError::MissingEnv(var.clone())),
        }
    }
}
