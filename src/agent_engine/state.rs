use serde::Serialize;

use crate::action::{Action, ParseError};
use crate::device::{ExecutionOutcome, Observation, ObservationSummary};

/// States of the control loop. `Terminal` is absorbing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Init,
    Observe,
    Plan,
    Validate { raw_text: String, rationale: Option<String> },
    Execute { action: Action, rationale: Option<String> },
    Record { action: Action, outcome: ExecutionOutcome, rationale: Option<String> },
    Decide,
    Terminal { status: RunStatus, reason: Option<String> },
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Init => "init",
            LoopState::Observe => "observe",
            LoopState::Plan => "plan",
            LoopState::Validate { .. } => "validate",
            LoopState::Execute { .. } => "execute",
            LoopState::Record { .. } => "record",
            LoopState::Decide => "decide",
            LoopState::Terminal { .. } => "terminal",
        }
    }

    pub(crate) fn terminal(status: RunStatus, reason: impl Into<String>) -> Self {
        LoopState::Terminal { status, reason: Some(reason.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Achieved,
    MaxStepsExceeded,
    AbortedOnError,
    UserCancelled,
}

/// External control messages, read at the `Decide` boundary when the run
/// pauses after each action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The action was executed; the outcome may still be a failure.
    Executed { outcome: ExecutionOutcome },
    /// The model output did not parse; nothing was executed.
    Rejected { error: ParseError },
}

/// One loop iteration as it appears in history. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    /// Position in history, starting at 0.
    pub index: usize,
    /// Budget step this record belongs to. Rejected records share the step
    /// of the action that eventually executes.
    pub step: u32,
    pub observation: ObservationSummary,
    pub action: Option<Action>,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StepRecord {
    pub fn executed(
        step: u32,
        observation: &Observation,
        action: Action,
        outcome: ExecutionOutcome,
        rationale: Option<String>,
    ) -> Self {
        Self {
            index: 0,
            step,
            observation: observation.summary(),
            action: Some(action),
            outcome: StepOutcome::Executed { outcome },
            rationale,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn rejected(step: u32, observation: &Observation, error: ParseError, rationale: Option<String>) -> Self {
        Self {
            index: 0,
            step,
            observation: observation.summary(),
            action: None,
            outcome: StepOutcome::Rejected { error },
            rationale,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self.outcome, StepOutcome::Executed { .. })
    }

    /// One line for the planner prompt.
    pub fn describe(&self) -> String {
        match (&self.action, &self.outcome) {
            (Some(action), StepOutcome::Executed { outcome }) => {
                let verdict = if outcome.is_success() { "ok" } else { "FAILED" };
                format!(
                    "{} -> {verdict}: {} (app: {})",
                    action.describe(),
                    outcome.message(),
                    self.observation.device.current_app
                )
            }
            (_, StepOutcome::Rejected { error }) => {
                format!("response rejected, nothing executed: {error}")
            }
            (None, StepOutcome::Executed { outcome }) => outcome.message().to_string(),
        }
    }
}

/// Final report of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    /// Present whenever `status` is not `achieved`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Actions executed against the budget.
    pub steps_taken: u32,
    pub history: Vec<StepRecord>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, FailureKind};

    fn observation() -> Observation {
        Observation {
            image_png: vec![1, 2, 3],
            captured_at: chrono::Utc::now(),
            device: DeviceInfo::new(1080, 2400, "com.android.settings"),
            screenshot_path: None,
        }
    }

    #[test]
    fn record_drops_image_bytes() {
        let rec = StepRecord::executed(
            0,
            &observation(),
            Action::Back,
            ExecutionOutcome::Succeeded { message: "BACK done".into() },
            None,
        );
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json["observation"].get("image_png").is_none());
        assert_eq!(json["outcome"]["kind"], "executed");
        assert_eq!(json["outcome"]["outcome"]["status"], "succeeded");
        assert_eq!(json["action"]["type"], "back");
    }

    #[test]
    fn describe_covers_failures_and_rejections() {
        let failed = StepRecord::executed(
            1,
            &observation(),
            Action::Tap { x: 1, y: 2 },
            ExecutionOutcome::Failed { kind: FailureKind::BridgeError, message: "input died".into() },
            None,
        );
        assert_eq!(
            failed.describe(),
            "TAP at (1, 2) -> FAILED: input died (app: com.android.settings)"
        );

        let rejected = StepRecord::rejected(
            1,
            &observation(),
            ParseError::UnknownActionTag { tag: "FLY".into() },
            None,
        );
        assert!(!rejected.is_executed());
        assert!(rejected.describe().contains("unknown action tag `FLY`"));
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(serde_json::to_value(RunStatus::MaxStepsExceeded).unwrap(), "max_steps_exceeded");
        assert_eq!(serde_json::to_value(RunStatus::UserCancelled).unwrap(), "user_cancelled");
    }
}
