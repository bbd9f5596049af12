pub mod adb;
pub mod bridge;
pub mod controller;
pub mod screenshot;
pub mod types;

use async_trait::async_trait;

use crate::action::Action;
use crate::errors::PilotResult;

pub use types::{DeviceInfo, ExecutionOutcome, FailureKind, Observation, ObservationSummary, Orientation};

/// Uniform capability the control loop drives. One controller instance
/// belongs to exactly one run.
#[async_trait]
pub trait DeviceController: Send + Sync {
    /// Captures the screen for `step`. Fails with `DeviceUnavailable` when
    /// the device cannot be reached and `CaptureFailed` on transport errors.
    async fn capture(&mut self, step: u32) -> PilotResult<Observation>;

    /// Executes one action. Never retries; failures come back as
    /// [`ExecutionOutcome::Failed`].
    async fn execute(&mut self, action: &Action) -> ExecutionOutcome;
}
