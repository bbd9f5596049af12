//! Prompt construction for the vision planner.
use std::collections::BTreeMap;

use crate::agent_engine::state::StepRecord;
use crate::config::RunConfig;
use crate::device::{screenshot, Observation};
use crate::llm::types::{ChatMessage, ContentPart, ImageUrl};

/// Built-in guidance appended unless the caller already said the same thing.
pub const DEFAULT_INSTRUCTIONS: &[&str] = &[
    "Be precise with tap coordinates, ensuring they are within visible UI elements",
    "Wait for the keyboard to appear before attempting to type text",
    "If keyboard doesn't appear after tapping an input field, try tapping again",
    "If a tap doesn't produce the expected result, try a slightly different location",
    "When typing, make sure to press enter/search after completing input",
    "If stuck in a loop, try using the back button or going to home screen",
    "Be patient when waiting for apps to load or respond to actions",
    "Verify that actions produce visible changes before proceeding",
];

const REPEAT_WINDOW: usize = 3;

/// User instructions followed by every default not already contained
/// (case-insensitively) in one of them.
pub fn merge_instructions(user: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = user.to_vec();
    for default in DEFAULT_INSTRUCTIONS {
        let needle = default.to_lowercase();
        if !user.iter().any(|i| i.to_lowercase().contains(&needle)) {
            merged.push((*default).to_string());
        }
    }
    merged
}

pub fn system_prompt(goal: &str, observation: &Observation, history: &[StepRecord], config: &RunConfig) -> String {
    let (w, h) = (observation.device.width, observation.device.height);
    let mut prompt = format!(
        "You are an Android device automation assistant. Your task is to help achieve the following goal:

GOAL: {goal}

You will analyze screenshots of an Android device to determine the appropriate actions to take.
Coordinates are absolute pixels of the screenshot: x in 0..{w}, y in 0..{h}.
You can perform the following actions:
1. TAP at specific coordinates (x, y)
2. SWIPE from (x, y) to (end_x, end_y), optional duration in milliseconds
3. SWIPE_UP or SWIPE_DOWN to scroll
4. TYPE text into the focused input field (single line, no tabs)
5. BACK to press the back button
6. HOME to go to the home screen
7. LAUNCH_APP to open an application by package or name (field \"package\")
8. SUCCESS when the goal is achieved
9. FAILURE when the goal cannot be achieved (field \"reason\")
"
    );

    if let Some(context) = config.context.as_deref().filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("\nAdditional context: {context}\n"));
    }

    let instructions = merge_instructions(&config.instructions);
    if !instructions.is_empty() {
        prompt.push_str("\nInstructions:\n");
        for instruction in &instructions {
            prompt.push_str(&format!("* {instruction}\n"));
        }
    }

    prompt.push_str(&history_guidance(history));

    prompt.push_str(
        "
When deciding the next action, think step by step:
1. Analyze what's currently visible on screen
2. Identify the next logical step toward the goal
3. Determine the specific action and parameters needed

Your response must contain exactly these three fenced blocks:
```observation
[Brief description of what you observe on screen]
```

```action
{\"action_type\": \"TAP\", \"x\": 540, \"y\": 1200}
```

```reasoning
[Your step-by-step reasoning explaining why this action will help achieve the goal]
```

The action block holds one JSON object. Use only the fields the action needs:
x, y, end_x, end_y, duration, text, package, reason.
",
    );
    prompt
}

/// Warnings about repeated actions plus per-tag statistics.
fn history_guidance(history: &[StepRecord]) -> String {
    let executed: Vec<&StepRecord> = history.iter().filter(|r| r.is_executed()).collect();
    if executed.is_empty() && history.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let recent: Vec<&str> = executed
        .iter()
        .rev()
        .take(REPEAT_WINDOW)
        .filter_map(|r| r.action.as_ref().map(|a| a.tag()))
        .collect();
    if recent.len() == REPEAT_WINDOW && recent.iter().all(|t| *t == recent[0]) {
        out.push_str("\nWARNING: The last few actions were all the same type. Try a different approach.\n");
    }

    let apps: Vec<&str> = executed
        .iter()
        .rev()
        .take(REPEAT_WINDOW)
        .map(|r| r.observation.device.current_app.as_str())
        .collect();
    if apps.len() == REPEAT_WINDOW && apps.iter().all(|a| *a == apps[0]) {
        out.push_str("WARNING: The foreground app hasn't changed in the last few actions. Check that your actions have an effect.\n");
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &executed {
        if let Some(action) = &record.action {
            *counts.entry(action.tag()).or_default() += 1;
        }
    }
    let rejected = history.len() - executed.len();
    if !counts.is_empty() || rejected > 0 {
        out.push_str("\nAction statistics:\n");
        for (tag, count) in &counts {
            out.push_str(&format!("- {tag}: {count} times\n"));
        }
        if rejected > 0 {
            out.push_str(&format!("- rejected responses: {rejected}\n"));
        }
    }
    out
}

/// Screenshot, device info and the recent history window.
pub fn user_message(observation: &Observation, history: &[StepRecord], window: usize) -> ChatMessage {
    let device = serde_json::json!({
        "screen_width": observation.device.width,
        "screen_height": observation.device.height,
        "orientation": observation.device.orientation,
        "current_app": observation.device.current_app,
    });

    let mut parts = vec![
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: screenshot::png_data_url(&observation.image_png) },
        },
        ContentPart::Text { text: format!("Device information: {device}") },
    ];

    let start = history.len().saturating_sub(window);
    let recent = &history[start..];
    if !recent.is_empty() {
        let mut text = String::from("Previous actions and their outcomes:\n");
        for record in recent {
            text.push_str(&format!("{}. {}\n", record.index + 1, record.describe()));
        }
        if matches!(recent.last(), Some(r) if !r.is_executed()) {
            text.push_str("Your last response was rejected. Answer again using the required format.\n");
        }
        parts.push(ContentPart::Text { text });
    }
    ChatMessage::user_parts(parts)
}
