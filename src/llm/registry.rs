use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig};
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> PilotResult<Arc<dyn LlmProvider>> {
        self.providers
            .get(&self.active)
            .cloned()
            .ok_or_else(|| PilotError::Config(format!("Active provider '{}' not found in registry", self.active)))
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Provider and call configuration for the vision role.
    ///
    /// Uses `[llm.vision]` when present, otherwise the active provider with
    /// its default model and temperature, non-streaming.
    pub fn vision(&self) -> PilotResult<(Arc<dyn LlmProvider>, CallConfig)> {
        if let Some(entry) = &self.llm_config.vision {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                PilotError::Config(format!(
                    "vision role references unknown provider '{}' (configured: {})",
                    entry.provider,
                    self.list_names().join(", ")
                ))
            })?;
            let defaults = self.llm_config.providers.get(&entry.provider);
            let temperature = entry
                .temperature
                .or_else(|| defaults.map(|p| p.temperature))
                .unwrap_or(0.2);
            let max_tokens = defaults.map(|p| p.max_tokens).unwrap_or(1000);
            tracing::debug!(
                provider = %entry.provider,
                model = %entry.model,
                stream = entry.stream,
                temperature,
                "resolved vision role"
            );
            return Ok((
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    stream: entry.stream,
                    temperature,
                    max_tokens,
                },
            ));
        }

        let provider = self.get_active()?;
        let entry = self.llm_config.providers.get(&self.active).ok_or_else(|| {
            PilotError::Config(format!("no [llm.providers.{}] section", self.active))
        })?;
        tracing::debug!(
            provider = %self.active,
            model = %entry.model,
            "vision role not configured, using active provider"
        );
        Ok((
            provider,
            CallConfig {
                model: entry.model.clone(),
                stream: false,
                temperature: entry.temperature,
                max_tokens: entry.max_tokens,
            },
        ))
    }

    /// Build a registry from the loaded app config.
    ///
    /// API keys: `ANDROID_PILOT_<ID>_API_KEY`, then `OPENAI_API_KEY`, then
    /// the `api_key` field of the provider entry.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let api_key = resolve_api_key(id, entry.api_key.as_deref(), |k| std::env::var(k).ok());
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            let provider = OpenAiCompatibleProvider::new(
                id.clone(),
                entry.api_base.clone(),
                api_key,
                entry.max_retries,
            );
            registry.register(Arc::new(provider));
        }
        registry
    }
}

fn env_key_name(id: &str) -> String {
    let id: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("ANDROID_PILOT_{id}_API_KEY")
}

fn resolve_api_key(id: &str, from_file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> String {
    env(&env_key_name(id))
        .filter(|k| !k.is_empty())
        .or_else(|| env("OPENAI_API_KEY").filter(|k| !k.is_empty()))
        .or_else(|| from_file.map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    const CONFIG: &str = r#"
[llm]
active_provider = "openai"

[llm.providers.openai]
display_name = "OpenAI"
api_base = "https://api.openai.com/v1/chat/completions"
model = "gpt-4o"
temperature = 0.1
max_tokens = 800

[llm.providers.local-vllm]
display_name = "vLLM"
api_base = "http://localhost:8000/v1/chat/completions"
model = "qwen2-vl"
"#;

    #[test]
    fn vision_falls_back_to_active_provider() {
        let cfg = parse_config(CONFIG).unwrap();
        let registry = ProviderRegistry::from_config(&cfg);
        assert_eq!(registry.list_names(), vec!["local-vllm", "openai"]);

        let (provider, call) = registry.vision().unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(call.model, "gpt-4o");
        assert_eq!(call.max_tokens, 800);
        assert!(!call.stream);
    }

    #[test]
    fn vision_role_overrides_model_and_stream() {
        let content = format!(
            "{CONFIG}\n[llm.vision]\nprovider = \"local-vllm\"\nmodel = \"qwen2-vl-72b\"\nstream = true\ntemperature = 0.0\n"
        );
        let registry = ProviderRegistry::from_config(&parse_config(&content).unwrap());
        let (provider, call) = registry.vision().unwrap();
        assert_eq!(provider.name(), "local-vllm");
        assert_eq!(call.model, "qwen2-vl-72b");
        assert!(call.stream);
        assert_eq!(call.temperature, 0.0);
        assert_eq!(call.max_tokens, 1000);
    }

    #[test]
    fn unknown_vision_provider_is_config_error() {
        let content = format!("{CONFIG}\n[llm.vision]\nprovider = \"nope\"\nmodel = \"m\"\n");
        let registry = ProviderRegistry::from_config(&parse_config(&content).unwrap());
        match registry.vision() {
            Err(PilotError::Config(msg)) => {
                assert!(msg.contains("'nope' (configured: local-vllm, openai)"), "{msg}")
            }
            Err(other) => panic!("expected config error, got {other:?}"),
            Ok(_) => panic!("unknown provider resolved"),
        }
    }

    #[test]
    fn api_key_precedence() {
        let env = |k: &str| match k {
            "ANDROID_PILOT_LOCAL_VLLM_API_KEY" => Some("specific".to_string()),
            "OPENAI_API_KEY" => Some("generic".to_string()),
            _ => None,
        };
        assert_eq!(resolve_api_key("local-vllm", Some("file"), env), "specific");
        assert_eq!(resolve_api_key("openai", Some("file"), env), "generic");
        assert_eq!(resolve_api_key("openai", Some("file"), |_| None), "file");
        assert_eq!(resolve_api_key("openai", None, |_| None), "");
    }
}
