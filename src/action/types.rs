use serde::Serialize;
use thiserror::Error;

/// Pixel extent of an observation. A point is inside iff
/// `0 <= x < width && 0 <= y < height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ScreenBounds {
    pub width: u32,
    pub height: u32,
}

impl ScreenBounds {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn extent(&self, axis: Axis) -> u32 {
        match axis {
            Axis::X => self.width,
            Axis::Y => self.height,
        }
    }

    /// Whether `v` lies in `0..extent(axis)`.
    pub fn contains_on(&self, axis: Axis, v: i64) -> bool {
        v >= 0 && v < self.extent(axis) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// The closed set of operations the agent may perform on the device.
///
/// Values built from model output come from [`crate::action::parse`], which
/// checks every invariant (coordinates in bounds, non-empty text and target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Tap { x: u32, y: u32 },
    Swipe { x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u32 },
    SwipeUp,
    SwipeDown,
    Type { text: String },
    Back,
    Home,
    LaunchApp { target: String },
}

impl Action {
    /// Wire tag, as the vision model writes it.
    pub fn tag(&self) -> &'static str {
        match self {
            Action::Tap { .. } => "TAP",
            Action::Swipe { .. } => "SWIPE",
            Action::SwipeUp => "SWIPE_UP",
            Action::SwipeDown => "SWIPE_DOWN",
            Action::Type { .. } => "TYPE",
            Action::Back => "BACK",
            Action::Home => "HOME",
            Action::LaunchApp { .. } => "LAUNCH_APP",
        }
    }

    /// One-line description used in prompts and logs.
    pub fn describe(&self) -> String {
        match self {
            Action::Tap { x, y } => format!("TAP at ({x}, {y})"),
            Action::Swipe { x1, y1, x2, y2, duration_ms } => {
                format!("SWIPE from ({x1}, {y1}) to ({x2}, {y2}) over {duration_ms}ms")
            }
            Action::Type { text } => format!("TYPE '{text}'"),
            Action::LaunchApp { target } => format!("LAUNCH_APP '{target}'"),
            other => other.tag().to_string(),
        }
    }
}

/// Why a model response could not be turned into an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseError {
    #[error("unknown action tag `{tag}`")]
    UnknownActionTag { tag: String },

    #[error("missing parameter `{param}`")]
    MissingParameter { param: String },

    #[error("`{param}` = {value} is outside the allowed range 0..{limit}")]
    OutOfBounds { param: String, value: i64, limit: i64 },

    #[error("malformed syntax: {detail}")]
    MalformedSyntax { detail: String },
}

impl ParseError {
    pub(crate) fn missing(param: &str) -> Self {
        ParseError::MissingParameter { param: param.to_string() }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        ParseError::MalformedSyntax { detail: detail.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_half_open() {
        let b = ScreenBounds::new(1080, 2400);
        assert!(b.contains_on(Axis::X, 0));
        assert!(b.contains_on(Axis::X, 1079));
        assert!(b.contains_on(Axis::Y, 2399));
        assert!(!b.contains_on(Axis::X, 1080));
        assert!(!b.contains_on(Axis::Y, 2400));
        assert!(!b.contains_on(Axis::X, -1));
    }

    #[test]
    fn action_serializes_with_type_tag() {
        let json = serde_json::to_value(Action::Tap { x: 3, y: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "tap", "x": 3, "y": 4}));
        let json = serde_json::to_value(Action::SwipeUp).unwrap();
        assert_eq!(json, serde_json::json!({"type": "swipe_up"}));
    }

    #[test]
    fn describe_mentions_parameters() {
        assert_eq!(Action::Type { text: "hi".into() }.describe(), "TYPE 'hi'");
        assert_eq!(Action::Back.describe(), "BACK");
    }
}
