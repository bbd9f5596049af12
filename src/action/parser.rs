//! Strict parser from vision-model text to [`Action`].
//!
//! The model is asked to answer with fenced blocks:
//!
//! ~~~text
//! ```observation
//! Home screen with the Settings icon in the second row.
//! ```
//! ```action
//! {"action_type": "TAP", "x": 540, "y": 1210}
//! ```
//! ```reasoning
//! Settings is needed to change the wallpaper.
//! ```
//! ~~~
//!
//! Exactly one `action` (or `json`) block must be present; a bare JSON
//! object is accepted when the response has no fenced blocks at all.
//! Everything here is pure: no I/O, no state.
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::action::types::{Action, Axis, ParseError, ScreenBounds};

pub const DEFAULT_SWIPE_DURATION_MS: u32 = 300;
pub const MAX_SWIPE_DURATION_MS: u32 = 5000;

/// Terminal signal carried in the action block instead of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalSignal {
    GoalAchieved,
    GoalUnreachable { reason: String },
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([A-Za-z_]*)[ \t]*\r?\n(.*?)```").expect("static regex")
    })
}

struct FencedBlock<'a> {
    label: String,
    body: &'a str,
}

fn fenced_blocks(raw: &str) -> Vec<FencedBlock<'_>> {
    fenced_block_re()
        .captures_iter(raw)
        .filter_map(|c| {
            let body = c.get(2)?.as_str();
            let label = c.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
            Some(FencedBlock { label, body })
        })
        .collect()
}

/// Locates the single JSON object describing the action.
fn action_object(raw: &str) -> Result<Map<String, Value>, ParseError> {
    let blocks = fenced_blocks(raw);
    let candidates: Vec<&str> = blocks
        .iter()
        .filter(|b| b.label == "action" || b.label == "json")
        .map(|b| b.body)
        .collect();

    let source = match candidates.as_slice() {
        [single] => *single,
        [] if blocks.is_empty() => raw,
        [] => return Err(ParseError::malformed("no ```action block in response")),
        _ => {
            return Err(ParseError::malformed(format!(
                "{} action blocks in response, expected exactly one",
                candidates.len()
            )))
        }
    };

    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(ParseError::malformed("empty action block"));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ParseError::malformed(format!(
            "action must be a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ParseError::malformed(format!("invalid JSON: {e}"))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// First present, non-null value among `keys`.
fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
    keys.iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
}

fn action_tag(obj: &Map<String, Value>) -> Result<String, ParseError> {
    let (key, value) =
        lookup(obj, &["action_type", "action"]).ok_or_else(|| ParseError::missing("action_type"))?;
    let tag = value
        .as_str()
        .ok_or_else(|| ParseError::malformed(format!("`{key}` must be a string")))?
        .trim();
    if tag.is_empty() {
        return Err(ParseError::missing("action_type"));
    }
    Ok(tag.to_ascii_uppercase().replace(['-', ' '], "_"))
}

fn integer(key: &str, value: &Value) -> Result<i64, ParseError> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    if value.as_u64().is_some() {
        return Ok(i64::MAX);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
        Some(f) => Err(ParseError::malformed(format!(
            "`{key}` must be a whole number of pixels, got {f}"
        ))),
        None => Err(ParseError::malformed(format!(
            "`{key}` must be a number, got {}",
            json_kind(value)
        ))),
    }
}

fn coordinate(
    obj: &Map<String, Value>,
    keys: &[&'static str],
    bounds: ScreenBounds,
    axis: Axis,
) -> Result<u32, ParseError> {
    let (key, value) = lookup(obj, keys).ok_or_else(|| ParseError::missing(keys[0]))?;
    let v = integer(key, value)?;
    if !bounds.contains_on(axis, v) {
        return Err(ParseError::OutOfBounds {
            param: key.to_string(),
            value: v,
            limit: bounds.extent(axis) as i64,
        });
    }
    Ok(v as u32)
}

fn text_param<'a>(obj: &'a Map<String, Value>, keys: &[&'static str]) -> Result<&'a str, ParseError> {
    let (key, value) = lookup(obj, keys).ok_or_else(|| ParseError::missing(keys[0]))?;
    let s = value
        .as_str()
        .ok_or_else(|| ParseError::malformed(format!("`{key}` must be a string")))?;
    if s.trim().is_empty() {
        return Err(ParseError::missing(key));
    }
    Ok(s)
}

fn swipe_duration(obj: &Map<String, Value>) -> Result<u32, ParseError> {
    let Some((key, value)) = lookup(obj, &["duration", "duration_ms"]) else {
        return Ok(DEFAULT_SWIPE_DURATION_MS);
    };
    let ms = integer(key, value)?;
    if !(1..=MAX_SWIPE_DURATION_MS as i64).contains(&ms) {
        return Err(ParseError::OutOfBounds {
            param: key.to_string(),
            value: ms,
            limit: MAX_SWIPE_DURATION_MS as i64 + 1,
        });
    }
    Ok(ms as u32)
}

fn is_launch_identifier(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
}

/// Turns raw model output into a validated [`Action`].
///
/// Coordinates are absolute pixels and must fall inside `bounds`; they are
/// never clamped. Ambiguous or incomplete input is always an error.
pub fn parse(raw: &str, bounds: ScreenBounds) -> Result<Action, ParseError> {
    let obj = action_object(raw)?;
    let tag = action_tag(&obj)?;

    match tag.as_str() {
        "TAP" => Ok(Action::Tap {
            x: coordinate(&obj, &["x"], bounds, Axis::X)?,
            y: coordinate(&obj, &["y"], bounds, Axis::Y)?,
        }),
        "SWIPE" => Ok(Action::Swipe {
            x1: coordinate(&obj, &["x", "start_x"], bounds, Axis::X)?,
            y1: coordinate(&obj, &["y", "start_y"], bounds, Axis::Y)?,
            x2: coordinate(&obj, &["end_x"], bounds, Axis::X)?,
            y2: coordinate(&obj, &["end_y"], bounds, Axis::Y)?,
            duration_ms: swipe_duration(&obj)?,
        }),
        "SWIPE_UP" => Ok(Action::SwipeUp),
        "SWIPE_DOWN" => Ok(Action::SwipeDown),
        "TYPE" => {
            let text = text_param(&obj, &["text"])?;
            if text.chars().any(char::is_control) {
                return Err(ParseError::malformed("`text` contains control characters"));
            }
            Ok(Action::Type { text: text.to_string() })
        }
        "BACK" => Ok(Action::Back),
        "HOME" => Ok(Action::Home),
        "LAUNCH_APP" => {
            let target = text_param(&obj, &["package", "app", "text"])?.trim();
            if !is_launch_identifier(target) {
                return Err(ParseError::malformed(format!(
                    "launch target `{target}` contains characters outside [A-Za-z0-9._- ]"
                )));
            }
            Ok(Action::LaunchApp { target: target.to_string() })
        }
        _ => Err(ParseError::UnknownActionTag { tag }),
    }
}

/// Content of the ```reasoning block, if the model wrote one.
pub fn extract_rationale(raw: &str) -> Option<String> {
    fenced_blocks(raw)
        .into_iter()
        .find(|b| b.label == "reasoning")
        .map(|b| b.body.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Detects a `SUCCESS` / `FAILURE` answer. Anything else, including text
/// that does not parse, is left for [`parse`] to classify.
pub fn terminal_signal(raw: &str) -> Option<TerminalSignal> {
    let obj = action_object(raw).ok()?;
    match action_tag(&obj).ok()?.as_str() {
        "SUCCESS" => Some(TerminalSignal::GoalAchieved),
        "FAILURE" => {
            let reason = lookup(&obj, &["reason", "text"])
                .and_then(|(_, v)| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .or_else(|| extract_rationale(raw))
                .unwrap_or_else(|| "model reported the goal as unreachable".to_string());
            Some(TerminalSignal::GoalUnreachable { reason })
        }
        _ => None,
    }
}
