pub mod prompt;
pub mod vision;

use async_trait::async_trait;

use crate::agent_engine::state::StepRecord;
use crate::config::RunConfig;
use crate::device::Observation;
use crate::errors::PilotResult;

pub use vision::VisionPlanner;

/// What the planner proposes for the current observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerResponse {
    /// Unvalidated model output; only [`crate::action::parse`] turns it into an action.
    ProposedAction { raw_text: String, rationale: Option<String> },
    GoalAchieved,
    GoalUnreachable { reason: String },
}

/// Maps observation, goal and history to the next step.
///
/// Errors are `PlannerUnavailable` or `PlannerTimeout`; the loop owns the
/// retry policy.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        observation: &Observation,
        goal: &str,
        history: &[StepRecord],
        config: &RunConfig,
    ) -> PilotResult<PlannerResponse>;
}
