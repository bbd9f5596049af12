use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Vision role. Falls back to the active provider's defaults when absent.
    #[serde(default)]
    pub vision: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint, e.g. `https://api.openai.com/v1/chat/completions`.
    pub api_base: String,
    /// Default model for this provider (used when no vision role is configured).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Optional API key stored in config.toml (env vars take precedence).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Transport-level retries for 429/5xx and connection errors.
    #[serde(default = "default_provider_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_provider_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub adb_path: String,
    /// `adb -s <serial>`; `None` targets the only attached device.
    pub serial: Option<String>,
    pub command_timeout_secs: u64,
    /// Pause after each executed action so the next capture sees the new UI.
    pub settle_ms: u64,
    /// Screenshots are written here as `step_NNNN.png`. `None` disables persistence.
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".into(),
            serial: None,
            command_timeout_secs: 20,
            settle_ms: 1000,
            screenshot_dir: Some(PathBuf::from("screenshots")),
        }
    }
}

impl DeviceConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Retry and timeout policy of the control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub capture_retries: u32,
    /// First backoff delay; doubled after every failed attempt.
    pub capture_backoff_ms: u64,
    pub planner_retries: u32,
    pub planner_timeout_secs: u64,
    /// Upper bound on any single capture or execute call seen by the loop.
    pub device_timeout_secs: u64,
    pub max_consecutive_parse_failures: u32,
    /// Consecutive executed steps on the same foreground app and screen
    /// size after which the run aborts as stuck. 0 disables the check.
    pub max_repeated_states: u32,
    /// Number of recent step records shown to the vision model.
    pub history_window: usize,
    /// Append every step record to a JSONL session log.
    pub session_log: bool,
    pub session_dir: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            capture_retries: 3,
            capture_backoff_ms: 500,
            planner_retries: 2,
            planner_timeout_secs: 90,
            device_timeout_secs: 30,
            max_consecutive_parse_failures: 3,
            max_repeated_states: 5,
            history_window: 5,
            session_log: true,
            session_dir: None,
        }
    }
}

impl AgentSettings {
    pub fn capture_backoff(&self) -> Duration {
        Duration::from_millis(self.capture_backoff_ms)
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(self.planner_timeout_secs)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_secs)
    }

    /// Returns the configured session directory or
    /// `<data_local_dir>/android-pilot/sessions`, falling back to the
    /// current working directory.
    pub fn resolve_session_dir(&self) -> PathBuf {
        if let Some(dir) = &self.session_dir {
            return dir.clone();
        }
        match dirs::data_local_dir() {
            Some(base) => base.join("android-pilot").join("sessions"),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// Everything one run needs from the caller. Immutable for the run's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub goal: String,
    pub max_steps: u32,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub pause_after_each_action: bool,
    #[serde(default)]
    pub debug: bool,
}

impl RunConfig {
    pub fn new(goal: impl Into<String>, max_steps: u32) -> Self {
        Self {
            goal: goal.into(),
            max_steps,
            context: None,
            instructions: Vec::new(),
            pause_after_each_action: false,
            debug: false,
        }
    }

    pub fn validate(&self) -> PilotResult<()> {
        if self.max_steps == 0 {
            return Err(PilotError::Config("max_steps must be at least 1".into()));
        }
        if self.goal.trim().is_empty() {
            return Err(PilotError::Config("goal must not be empty".into()));
        }
        Ok(())
    }
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

/// Loads `config.toml` from `path`, or searches next to the executable and
/// then in the working directory.
pub fn load_config(path: Option<&Path>) -> PilotResult<AppConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => resolve_config_path()?,
    };
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn parse_config(content: &str) -> PilotResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    if config.agent.max_consecutive_parse_failures == 0 {
        return Err(PilotError::Config(
            "agent.max_consecutive_parse_failures must be at least 1".into(),
        ));
    }
    Ok(config)
}
