use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::action::ScreenBounds;
use crate::errors::PilotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn from_size(width: u32, height: u32) -> Self {
        if height >= width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    /// Package of the foreground app, or `"unknown"`.
    pub current_app: String,
}

impl DeviceInfo {
    pub fn new(width: u32, height: u32, current_app: impl Into<String>) -> Self {
        Self {
            width,
            height,
            orientation: Orientation::from_size(width, height),
            current_app: current_app.into(),
        }
    }

    pub fn bounds(&self) -> ScreenBounds {
        ScreenBounds::new(self.width, self.height)
    }
}

/// One captured snapshot of the device screen.
#[derive(Debug, Clone)]
pub struct Observation {
    /// PNG bytes exactly as returned by the bridge.
    pub image_png: Vec<u8>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub device: DeviceInfo,
    /// Where the screenshot was persisted, if it was.
    pub screenshot_path: Option<PathBuf>,
}

impl Observation {
    pub fn bounds(&self) -> ScreenBounds {
        self.device.bounds()
    }

    /// What history keeps once the step resolves; the image itself is dropped.
    pub fn summary(&self) -> ObservationSummary {
        ObservationSummary {
            captured_at: self.captured_at,
            device: self.device.clone(),
            screenshot_path: self.screenshot_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSummary {
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub device: DeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidTarget,
    Timeout,
    BridgeError,
}

/// Result of executing one action. Recoverable failures live here instead of
/// in `Err` so the loop can record them and carry on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded { message: String },
    Failed { kind: FailureKind, message: String },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            ExecutionOutcome::Succeeded { message } | ExecutionOutcome::Failed { message, .. } => message,
        }
    }

    pub fn from_error(err: &PilotError) -> Self {
        let kind = match err {
            PilotError::InvalidTarget(_) => FailureKind::InvalidTarget,
            PilotError::Timeout(_) => FailureKind::Timeout,
            _ => FailureKind::BridgeError,
        };
        ExecutionOutcome::Failed { kind, message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_follows_aspect() {
        assert_eq!(DeviceInfo::new(1080, 2400, "x").orientation, Orientation::Portrait);
        assert_eq!(DeviceInfo::new(2400, 1080, "x").orientation, Orientation::Landscape);
    }

    #[test]
    fn errors_map_to_failure_kinds() {
        let cases = [
            (PilotError::InvalidTarget("nope".into()), FailureKind::InvalidTarget),
            (PilotError::Timeout("slow".into()), FailureKind::Timeout),
            (PilotError::BridgeError("boom".into()), FailureKind::BridgeError),
            (PilotError::DeviceUnavailable("gone".into()), FailureKind::BridgeError),
        ];
        for (err, expected) in cases {
            match ExecutionOutcome::from_error(&err) {
                ExecutionOutcome::Failed { kind, message } => {
                    assert_eq!(kind, expected);
                    assert_eq!(message, err.to_string());
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
