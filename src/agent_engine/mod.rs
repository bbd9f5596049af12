pub mod engine;
pub mod history;
pub mod loop_control;
pub mod state;

pub use engine::AgentEngine;
pub use state::{AgentEvent, LoopState, RunResult, RunStatus, StepOutcome, StepRecord};
