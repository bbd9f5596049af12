pub mod action;
pub mod agent_engine;
pub mod config;
pub mod device;
pub mod errors;
pub mod llm;
pub mod planner;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::{AgentEngine, AgentEvent, RunResult, RunStatus};
use crate::config::{AppConfig, RunConfig};
use crate::device::adb::AdbBridge;
use crate::device::controller::BridgeController;
use crate::llm::registry::ProviderRegistry;
use crate::planner::VisionPlanner;

/// Runs one goal against the device and vision model described by `app`.
///
/// Wires [`AdbBridge`] and [`VisionPlanner`] into an [`AgentEngine`]. A
/// misconfigured vision role ends the run as `aborted_on_error` without
/// touching the device.
pub async fn run(
    app: &AppConfig,
    config: RunConfig,
    cancel: CancellationToken,
    events: Option<mpsc::Receiver<AgentEvent>>,
) -> RunResult {
    let registry = ProviderRegistry::from_config(app);
    let (provider, call) = match registry.vision() {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "no vision model configured");
            let now = chrono::Utc::now();
            return RunResult {
                run_id: uuid::Uuid::new_v4().to_string(),
                status: RunStatus::AbortedOnError,
                reason: Some(e.to_string()),
                steps_taken: 0,
                history: Vec::new(),
                started_at: now,
                finished_at: now,
            };
        }
    };
    tracing::info!(provider = %provider.name(), model = %call.model, "vision model selected");

    let planner = VisionPlanner::new(provider, call, app.agent.history_window);
    let controller = BridgeController::from_config(AdbBridge::from_config(&app.device), &app.device);

    AgentEngine::new(controller, planner, app.agent.clone(), cancel, events)
        .run(config)
        .await
}
