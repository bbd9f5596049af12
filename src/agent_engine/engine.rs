use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::action;
use crate::agent_engine::history::RunHistory;
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::state::{AgentEvent, LoopState, RunResult, RunStatus, StepRecord};
use crate::config::{AgentSettings, RunConfig};
use crate::device::{DeviceController, ExecutionOutcome, FailureKind, Observation};
use crate::errors::{PilotError, PilotResult};
use crate::planner::{Planner, PlannerResponse};

/// Drives one run: observe, plan, validate, execute, record, decide.
///
/// The engine owns its controller and planner for the lifetime of the run;
/// [`AgentEngine::run`] consumes it.
pub struct AgentEngine<C: DeviceController, P: Planner> {
    controller: C,
    planner: P,
    settings: AgentSettings,
    cancel: CancellationToken,
    events: Option<mpsc::Receiver<AgentEvent>>,
}

impl<C: DeviceController, P: Planner> AgentEngine<C, P> {
    /// `events` is required when a run pauses after each action; it is
    /// read only at the `Decide` boundary.
    pub fn new(
        controller: C,
        planner: P,
        settings: AgentSettings,
        cancel: CancellationToken,
        events: Option<mpsc::Receiver<AgentEvent>>,
    ) -> Self {
        Self {
            controller,
            planner,
            settings,
            cancel,
            events,
        }
    }

    /// Runs `config` to a terminal state.
    ///
    /// Cancellation is cooperative and checked only at `Decide`. A cancel
    /// raised mid-step takes effect once the in-flight step finishes, so the
    /// worst-case latency is one device timeout for capture (times the
    /// capture retries with their backoff), one planner timeout per planner
    /// attempt, and one device timeout for execute. While paused for
    /// confirmation the token is honoured immediately.
    pub async fn run(mut self, config: RunConfig) -> RunResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now();
        let mut loop_ctrl = LoopController::new(config.max_steps, &self.settings);
        let mut history = RunHistory::in_memory();
        let mut observation: Option<Observation> = None;
        let mut state = LoopState::Init;

        tracing::info!(run_id = %run_id, goal = %config.goal, max_steps = config.max_steps, "run started");

        let (status, reason) = loop {
            tracing::debug!(state = state.name(), step = loop_ctrl.steps_taken(), "loop state");
            state = match state {
                // ── Init: validate config, open the session log ───────────
                LoopState::Init => match self.validate(&config) {
                    Ok(()) => {
                        if self.settings.session_log {
                            let dir = self.settings.resolve_session_dir();
                            match RunHistory::with_session_log(&dir, &run_id) {
                                Ok(h) => history = h,
                                Err(e) => tracing::warn!(error = %e, "session log disabled"),
                            }
                        }
                        LoopState::Observe
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "invalid run configuration");
                        LoopState::terminal(RunStatus::AbortedOnError, e.to_string())
                    }
                },

                // ── Observe: capture with bounded retry ───────────────────
                LoopState::Observe => match self.observe(&loop_ctrl).await {
                    Ok(obs) => {
                        observation = Some(obs);
                        LoopState::Plan
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "capture failed, aborting");
                        LoopState::terminal(RunStatus::AbortedOnError, format!("capture failed: {e}"))
                    }
                },

                // ── Plan: one planner call, bounded retry on failure ──────
                LoopState::Plan => {
                    let Some(obs) = observation.as_ref() else {
                        break (RunStatus::AbortedOnError, Some("planning without an observation".into()));
                    };
                    match self.plan(obs, history.records(), &config).await {
                        Ok(PlannerResponse::GoalAchieved) => {
                            tracing::info!(step = loop_ctrl.steps_taken(), "goal achieved");
                            LoopState::Terminal { status: RunStatus::Achieved, reason: None }
                        }
                        Ok(PlannerResponse::GoalUnreachable { reason }) => {
                            tracing::warn!(reason = %reason, "planner reports goal unreachable");
                            LoopState::terminal(RunStatus::AbortedOnError, format!("goal unreachable: {reason}"))
                        }
                        Ok(PlannerResponse::ProposedAction { raw_text, rationale }) => {
                            loop_ctrl.reset_planner_failures();
                            LoopState::Validate { raw_text, rationale }
                        }
                        Err(e) => {
                            if loop_ctrl.record_planner_failure() {
                                tracing::error!(error = %e, "planner failed, retries exhausted");
                                LoopState::terminal(RunStatus::AbortedOnError, format!("planner failed: {e}"))
                            } else {
                                tracing::warn!(error = %e, "planner failed, re-planning");
                                LoopState::Plan
                            }
                        }
                    }
                }

                // ── Validate: parse untrusted model output ────────────────
                LoopState::Validate { raw_text, rationale } => {
                    let Some(obs) = observation.as_ref() else {
                        break (RunStatus::AbortedOnError, Some("validating without an observation".into()));
                    };
                    match action::parse(&raw_text, obs.bounds()) {
                        Ok(action) => {
                            loop_ctrl.reset_parse_failures();
                            tracing::info!(step = loop_ctrl.steps_taken(), action = %action.describe(), "action validated");
                            LoopState::Execute { action, rationale }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "model response rejected");
                            let step = loop_ctrl.steps_taken();
                            history.push(StepRecord::rejected(step, obs, err.clone(), rationale));
                            if loop_ctrl.record_parse_failure() {
                                LoopState::terminal(
                                    RunStatus::AbortedOnError,
                                    format!(
                                        "{} consecutive unparseable responses, last: {err}",
                                        loop_ctrl.parse_failures()
                                    ),
                                )
                            } else {
                                LoopState::Plan
                            }
                        }
                    }
                }

                // ── Execute: failures are recorded, never fatal ───────────
                LoopState::Execute { action, rationale } => {
                    let outcome = self.execute(&action).await;
                    LoopState::Record { action, outcome, rationale }
                }

                LoopState::Record { action, outcome, rationale } => {
                    let Some(obs) = observation.take() else {
                        break (RunStatus::AbortedOnError, Some("recording without an observation".into()));
                    };
                    loop_ctrl.note_screen(&obs.device.current_app, obs.bounds());
                    let rec = history.push(StepRecord::executed(
                        loop_ctrl.steps_taken(),
                        &obs,
                        action,
                        outcome,
                        rationale,
                    ));
                    tracing::info!(index = rec.index, step = rec.step, "{}", rec.describe());
                    LoopState::Decide
                }

                // ── Decide: budget, stuck screen, cancellation, pause ─────
                LoopState::Decide => {
                    if loop_ctrl.complete_step() {
                        LoopState::terminal(
                            RunStatus::MaxStepsExceeded,
                            format!("step budget of {} exhausted", config.max_steps),
                        )
                    } else if let Some(stuck) = loop_ctrl.stuck_screen() {
                        tracing::warn!(reason = %stuck, "run looks stuck, aborting");
                        LoopState::terminal(RunStatus::AbortedOnError, stuck)
                    } else if self.cancel.is_cancelled() {
                        LoopState::terminal(RunStatus::UserCancelled, "cancelled by user")
                    } else if config.pause_after_each_action {
                        self.wait_for_continue().await
                    } else {
                        LoopState::Observe
                    }
                }

                LoopState::Terminal { status, reason } => break (status, reason),
            };
        };

        let finished_at = chrono::Utc::now();
        tracing::info!(
            run_id = %run_id,
            status = ?status,
            reason = reason.as_deref().unwrap_or(""),
            steps = loop_ctrl.steps_taken(),
            records = history.len(),
            "run finished"
        );

        RunResult {
            run_id,
            status,
            reason,
            steps_taken: loop_ctrl.steps_taken(),
            history: history.into_records(),
            started_at,
            finished_at,
        }
    }

    fn validate(&self, config: &RunConfig) -> PilotResult<()> {
        config.validate()?;
        if config.pause_after_each_action && self.events.is_none() {
            return Err(PilotError::Config(
                "pause_after_each_action needs an event channel to resume".into(),
            ));
        }
        Ok(())
    }

    async fn observe(&mut self, loop_ctrl: &LoopController) -> PilotResult<Observation> {
        let timeout = self.settings.device_timeout();
        let step = loop_ctrl.steps_taken();
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(timeout, self.controller.capture(step)).await {
                Ok(r) => r,
                Err(_) => Err(PilotError::Timeout(format!("capture exceeded {timeout:?}"))),
            };
            match result {
                Ok(obs) => return Ok(obs),
                Err(e) if e.is_transient_capture() => {
                    attempt += 1;
                    let Some(delay) = loop_ctrl.capture_backoff(attempt) else {
                        return Err(e);
                    };
                    tracing::warn!(error = %e, attempt, "capture failed, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The engine owns the planner timeout so that every [`Planner`] is
    /// bounded the same way.
    async fn plan(
        &self,
        observation: &Observation,
        history: &[StepRecord],
        config: &RunConfig,
    ) -> PilotResult<PlannerResponse> {
        let timeout = self.settings.planner_timeout();
        tokio::time::timeout(timeout, self.planner.plan(observation, &config.goal, history, config))
            .await
            .map_err(|_| PilotError::PlannerTimeout(timeout))?
    }

    async fn execute(&mut self, action: &action::Action) -> ExecutionOutcome {
        let timeout = self.settings.device_timeout();
        match tokio::time::timeout(timeout, self.controller.execute(action)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(action = %action.describe(), "execute timed out");
                ExecutionOutcome::Failed {
                    kind: FailureKind::Timeout,
                    message: format!("{} exceeded {timeout:?}", action.describe()),
                }
            }
        }
    }

    /// Only an event sent after the pause begins resumes the run. Queued
    /// `Continue`s are stale and dropped; a queued `Stop` still stops.
    async fn wait_for_continue(&mut self) -> LoopState {
        let Some(events) = self.events.as_mut() else {
            return LoopState::terminal(RunStatus::AbortedOnError, "paused without an event channel");
        };
        let mut stale = 0u32;
        loop {
            match events.try_recv() {
                Ok(AgentEvent::Continue) => stale += 1,
                Err(TryRecvError::Empty) => break,
                Ok(AgentEvent::Stop) | Err(TryRecvError::Disconnected) => {
                    return LoopState::terminal(RunStatus::UserCancelled, "stopped while paused")
                }
            }
        }
        if stale > 0 {
            tracing::debug!(stale, "dropped confirmations sent before the pause");
        }
        tracing::info!("paused, waiting for confirmation");
        tokio::select! {
            _ = self.cancel.cancelled() => LoopState::terminal(RunStatus::UserCancelled, "cancelled while paused"),
            event = events.recv() => match event {
                Some(AgentEvent::Continue) => {
                    tracing::info!("resumed");
                    LoopState::Observe
                }
                Some(AgentEvent::Stop) | None => LoopState::terminal(RunStatus::UserCancelled, "stopped while paused"),
            },
        }
    }
}
