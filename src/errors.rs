use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Device side ───────────────────────────────────────────────────────
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("Device bridge error: {0}")]
    BridgeError(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // ── Planning side ─────────────────────────────────────────────────────
    #[error("Planner unavailable: {0}")]
    PlannerUnavailable(String),

    #[error("Planner timed out after {0:?}")]
    PlannerTimeout(std::time::Duration),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl PilotError {
    /// Capture-side failures the loop is allowed to retry before aborting.
    pub fn is_transient_capture(&self) -> bool {
        matches!(
            self,
            PilotError::DeviceUnavailable(_) | PilotError::CaptureFailed(_) | PilotError::Timeout(_)
        )
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
