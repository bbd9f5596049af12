use std::time::Duration;

use crate::action::ScreenBounds;
use crate::config::AgentSettings;

/// Counters that bound the loop: step budget, consecutive parse failures,
/// planner retries, capture retries and repeated screens.
pub struct LoopController {
    max_steps: u32,
    steps_taken: u32,
    max_parse_failures: u32,
    parse_failures: u32,
    planner_retries: u32,
    planner_failures: u32,
    capture_retries: u32,
    capture_backoff: Duration,
    max_repeated_states: u32,
    last_screen: Option<(String, ScreenBounds)>,
    repeated_screens: u32,
}

impl LoopController {
    pub fn new(max_steps: u32, settings: &AgentSettings) -> Self {
        Self {
            max_steps,
            steps_taken: 0,
            max_parse_failures: settings.max_consecutive_parse_failures.max(1),
            parse_failures: 0,
            planner_retries: settings.planner_retries,
            planner_failures: 0,
            capture_retries: settings.capture_retries,
            capture_backoff: settings.capture_backoff(),
            max_repeated_states: settings.max_repeated_states,
            last_screen: None,
            repeated_screens: 0,
        }
    }

    pub fn steps_taken(&self) -> u32 {
        self.steps_taken
    }

    /// Counts one executed step. Returns true once the budget is spent.
    pub fn complete_step(&mut self) -> bool {
        self.steps_taken += 1;
        self.steps_taken >= self.max_steps
    }

    /// Counts a rejected response. Returns true when the cap is reached.
    pub fn record_parse_failure(&mut self) -> bool {
        self.parse_failures += 1;
        self.parse_failures >= self.max_parse_failures
    }

    pub fn parse_failures(&self) -> u32 {
        self.parse_failures
    }

    pub fn reset_parse_failures(&mut self) {
        self.parse_failures = 0;
    }

    /// Counts a failed planner call. Returns true when no retry is left.
    pub fn record_planner_failure(&mut self) -> bool {
        self.planner_failures += 1;
        self.planner_failures > self.planner_retries
    }

    pub fn reset_planner_failures(&mut self) {
        self.planner_failures = 0;
    }

    /// Notes the screen an executed step acted on. Rejected responses are
    /// not steps and never reach here.
    pub fn note_screen(&mut self, app: &str, bounds: ScreenBounds) {
        match &self.last_screen {
            Some((last_app, last_bounds)) if last_app == app && *last_bounds == bounds => {
                self.repeated_screens += 1;
            }
            _ => {
                self.last_screen = Some((app.to_string(), bounds));
                self.repeated_screens = 1;
            }
        }
    }

    /// Describes the screen once `max_repeated_states` consecutive executed
    /// steps have all seen it.
    pub fn stuck_screen(&self) -> Option<String> {
        if self.max_repeated_states == 0 || self.repeated_screens < self.max_repeated_states {
            return None;
        }
        let (app, bounds) = self.last_screen.as_ref()?;
        Some(format!(
            "screen unchanged ({app}, {}x{}) for {} consecutive steps",
            bounds.width, bounds.height, self.repeated_screens
        ))
    }

    /// Delay before capture retry `attempt` (1-based), or `None` when
    /// retries are exhausted. Doubles per attempt.
    pub fn capture_backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.capture_retries {
            return None;
        }
        Some(self.capture_backoff.saturating_mul(1u32 << (attempt - 1).min(16)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AgentSettings {
        AgentSettings {
            capture_retries: 3,
            capture_backoff_ms: 100,
            planner_retries: 1,
            max_consecutive_parse_failures: 2,
            max_repeated_states: 3,
            ..AgentSettings::default()
        }
    }

    #[test]
    fn budget_is_spent_after_max_steps() {
        let mut ctrl = LoopController::new(2, &settings());
        assert!(!ctrl.complete_step());
        assert!(ctrl.complete_step());
        assert_eq!(ctrl.steps_taken(), 2);
    }

    #[test]
    fn parse_failures_reset_on_success() {
        let mut ctrl = LoopController::new(5, &settings());
        assert!(!ctrl.record_parse_failure());
        ctrl.reset_parse_failures();
        assert!(!ctrl.record_parse_failure());
        assert!(ctrl.record_parse_failure());
    }

    #[test]
    fn planner_gets_retries_plus_one_attempts() {
        let mut ctrl = LoopController::new(5, &settings());
        assert!(!ctrl.record_planner_failure());
        assert!(ctrl.record_planner_failure());
    }

    #[test]
    fn capture_backoff_doubles_then_stops() {
        let ctrl = LoopController::new(5, &settings());
        assert_eq!(ctrl.capture_backoff(1), Some(Duration::from_millis(100)));
        assert_eq!(ctrl.capture_backoff(2), Some(Duration::from_millis(200)));
        assert_eq!(ctrl.capture_backoff(3), Some(Duration::from_millis(400)));
        assert_eq!(ctrl.capture_backoff(4), None);
    }

    #[test]
    fn repeated_screen_trips_after_cap() {
        let mut ctrl = LoopController::new(10, &settings());
        let phone = ScreenBounds::new(1080, 2400);
        ctrl.note_screen("com.android.settings", phone);
        ctrl.note_screen("com.android.settings", phone);
        assert_eq!(ctrl.stuck_screen(), None);
        ctrl.note_screen("com.android.settings", phone);
        assert_eq!(
            ctrl.stuck_screen().as_deref(),
            Some("screen unchanged (com.android.settings, 1080x2400) for 3 consecutive steps")
        );
    }

    #[test]
    fn app_or_rotation_change_resets_the_count() {
        let mut ctrl = LoopController::new(10, &settings());
        let portrait = ScreenBounds::new(1080, 2400);
        ctrl.note_screen("com.android.settings", portrait);
        ctrl.note_screen("com.android.settings", portrait);
        ctrl.note_screen("com.android.chrome", portrait);
        ctrl.note_screen("com.android.chrome", portrait);
        ctrl.note_screen("com.android.chrome", ScreenBounds::new(2400, 1080));
        ctrl.note_screen("com.android.chrome", ScreenBounds::new(2400, 1080));
        assert_eq!(ctrl.stuck_screen(), None);
    }

    #[test]
    fn zero_disables_the_repeated_screen_check() {
        let settings = AgentSettings { max_repeated_states: 0, ..settings() };
        let mut ctrl = LoopController::new(10, &settings);
        for _ in 0..20 {
            ctrl.note_screen("com.android.launcher3", ScreenBounds::new(1080, 2400));
        }
        assert_eq!(ctrl.stuck_screen(), None);
    }
}
