use std::sync::Arc;

use async_trait::async_trait;

use crate::action::{self, TerminalSignal};
use crate::agent_engine::state::StepRecord;
use crate::config::RunConfig;
use crate::device::Observation;
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage};
use crate::planner::{prompt, Planner, PlannerResponse};

/// [`Planner`] backed by one OpenAI-compatible vision model call per step.
///
/// Calls are not time-bounded here; the agent engine applies
/// `agent.planner_timeout_secs` around every planner.
pub struct VisionPlanner {
    provider: Arc<dyn LlmProvider>,
    call: CallConfig,
    history_window: usize,
}

impl VisionPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>, call: CallConfig, history_window: usize) -> Self {
        Self {
            provider,
            call,
            history_window,
        }
    }
}

#[async_trait]
impl Planner for VisionPlanner {
    async fn plan(
        &self,
        observation: &Observation,
        goal: &str,
        history: &[StepRecord],
        config: &RunConfig,
    ) -> PilotResult<PlannerResponse> {
        let system = prompt::system_prompt(goal, observation, history, config);
        let user = prompt::user_message(observation, history, self.history_window);

        if config.debug {
            tracing::info!(prompt = %system, "system prompt");
        } else {
            tracing::debug!(prompt_len = system.len(), history = history.len(), "system prompt built");
        }

        let messages = vec![ChatMessage::system(system), user];
        let response = self.provider.chat(messages, &self.call).await.map_err(|e| match e {
            PilotError::PlannerUnavailable(_) => e,
            other => PilotError::PlannerUnavailable(format!("{}: {other}", self.provider.name())),
        })?;

        let raw_text = response.content;
        if config.debug {
            tracing::info!(response = %raw_text, "model response");
        } else {
            tracing::debug!(response_len = raw_text.len(), "model response received");
        }

        if raw_text.trim().is_empty() {
            return Err(PilotError::PlannerUnavailable(format!(
                "{} returned an empty response",
                self.provider.name()
            )));
        }

        let rationale = action::extract_rationale(&raw_text);
        Ok(match action::terminal_signal(&raw_text) {
            Some(TerminalSignal::GoalAchieved) => PlannerResponse::GoalAchieved,
            Some(TerminalSignal::GoalUnreachable { reason }) => PlannerResponse::GoalUnreachable { reason },
            None => PlannerResponse::ProposedAction { raw_text, rationale },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInfo;
    use crate::llm::types::LlmResponse;

    struct Scripted {
        reply: PilotResult<String>,
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, messages: Vec<ChatMessage>, _cfg: &CallConfig) -> PilotResult<LlmResponse> {
            assert_eq!(messages.len(), 2);
            match &self.reply {
                Ok(content) => Ok(LlmResponse { content: content.clone(), reasoning: String::new() }),
                Err(e) => Err(PilotError::Config(e.to_string())),
            }
        }
    }

    fn planner(reply: PilotResult<String>) -> VisionPlanner {
        let call = CallConfig {
            model: "m".into(),
            stream: false,
            temperature: 0.0,
            max_tokens: 100,
        };
        VisionPlanner::new(Arc::new(Scripted { reply }), call, 5)
    }

    fn observation() -> Observation {
        Observation {
            image_png: Vec::new(),
            captured_at: chrono::Utc::now(),
            device: DeviceInfo::new(1080, 2400, "unknown"),
            screenshot_path: None,
        }
    }

    async fn plan(p: &VisionPlanner) -> PilotResult<PlannerResponse> {
        let config = RunConfig::new("open settings", 3);
        p.plan(&observation(), &config.goal, &[], &config).await
    }

    #[tokio::test]
    async fn action_text_is_forwarded_unparsed() {
        let raw = "```action\n{\"action_type\": \"FLY\"}\n```\n```reasoning\nwhy not\n```";
        let resp = plan(&planner(Ok(raw.into()))).await.unwrap();
        assert_eq!(
            resp,
            PlannerResponse::ProposedAction { raw_text: raw.into(), rationale: Some("why not".into()) }
        );
    }

    #[tokio::test]
    async fn terminal_signals_are_recognised() {
        let done = "```action\n{\"action_type\": \"SUCCESS\"}\n```";
        assert_eq!(plan(&planner(Ok(done.into()))).await.unwrap(), PlannerResponse::GoalAchieved);

        let stuck = "```action\n{\"action_type\": \"FAILURE\", \"reason\": \"app not installed\"}\n```";
        assert_eq!(
            plan(&planner(Ok(stuck.into()))).await.unwrap(),
            PlannerResponse::GoalUnreachable { reason: "app not installed".into() }
        );
    }

    #[tokio::test]
    async fn provider_errors_become_unavailable() {
        let err = plan(&planner(Err(PilotError::Config("boom".into())))).await.unwrap_err();
        assert!(matches!(err, PilotError::PlannerUnavailable(_)), "{err:?}");

        let err = plan(&planner(Ok("   ".into()))).await.unwrap_err();
        assert!(matches!(err, PilotError::PlannerUnavailable(_)), "{err:?}");
    }
}
