use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::action::{Action, ScreenBounds};
use crate::config::DeviceConfig;
use crate::device::bridge::{DeviceBridge, KEYCODE_BACK, KEYCODE_HOME};
use crate::device::screenshot;
use crate::device::types::{DeviceInfo, ExecutionOutcome, FailureKind, Observation};
use crate::device::DeviceController;
use crate::errors::{PilotError, PilotResult};

/// Vertical span of SWIPE_UP / SWIPE_DOWN in percent of screen height.
const SCROLL_UP: (u32, u32) = (70, 20);
const SCROLL_DOWN: (u32, u32) = (30, 80);
const SCROLL_DURATION_MS: u32 = 300;

/// [`DeviceController`] on top of any [`DeviceBridge`].
pub struct BridgeController<B: DeviceBridge> {
    bridge: B,
    screenshot_dir: Option<PathBuf>,
    settle_delay: Duration,
    last_bounds: Option<ScreenBounds>,
}

impl<B: DeviceBridge> BridgeController<B> {
    pub fn new(bridge: B, screenshot_dir: Option<PathBuf>, settle_delay: Duration) -> Self {
        Self {
            bridge,
            screenshot_dir,
            settle_delay,
            last_bounds: None,
        }
    }

    pub fn from_config(bridge: B, cfg: &DeviceConfig) -> Self {
        Self::new(bridge, cfg.screenshot_dir.clone(), cfg.settle_delay())
    }

    async fn dispatch(&self, action: &Action) -> PilotResult<()> {
        match action {
            Action::Tap { x, y } => self.bridge.tap(*x, *y).await,
            Action::Swipe { x1, y1, x2, y2, duration_ms } => {
                self.bridge.swipe(*x1, *y1, *x2, *y2, *duration_ms).await
            }
            Action::SwipeUp | Action::SwipeDown => {
                let bounds = self.last_bounds.ok_or_else(|| {
                    PilotError::InvalidTarget("no screen captured yet, size unknown".into())
                })?;
                let (from, to) = if matches!(action, Action::SwipeUp) { SCROLL_UP } else { SCROLL_DOWN };
                let x = bounds.width / 2;
                let y1 = bounds.height * from / 100;
                let y2 = bounds.height * to / 100;
                self.bridge.swipe(x, y1, x, y2, SCROLL_DURATION_MS).await
            }
            Action::Type { text } => self.bridge.type_text(text).await,
            Action::Back => self.bridge.press_key(KEYCODE_BACK).await,
            Action::Home => self.bridge.press_key(KEYCODE_HOME).await,
            Action::LaunchApp { target } => self.bridge.launch(target).await,
        }
    }
}

#[async_trait]
impl<B: DeviceBridge> DeviceController for BridgeController<B> {
    async fn capture(&mut self, step: u32) -> PilotResult<Observation> {
        let image_png = self.bridge.capture_screen().await.map_err(|e| match e {
            PilotError::DeviceUnavailable(_) | PilotError::CaptureFailed(_) | PilotError::Timeout(_) => e,
            other => PilotError::CaptureFailed(other.to_string()),
        })?;
        let captured_at = chrono::Utc::now();
        let (width, height) = screenshot::image_dimensions(&image_png)?;

        let current_app = match self.bridge.current_app().await {
            Ok(app) => app,
            Err(e) => {
                tracing::warn!(error = %e, "foreground app lookup failed");
                "unknown".to_string()
            }
        };

        let screenshot_path = match &self.screenshot_dir {
            Some(dir) => match screenshot::persist(dir, step, &image_png).await {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, step, "could not persist screenshot");
                    None
                }
            },
            None => None,
        };

        let device = DeviceInfo::new(width, height, current_app);
        self.last_bounds = Some(device.bounds());
        tracing::info!(
            step,
            size = %format!("{width}×{height}"),
            app = %device.current_app,
            "screen captured"
        );

        Ok(Observation {
            image_png,
            captured_at,
            device,
            screenshot_path,
        })
    }

    async fn execute(&mut self, action: &Action) -> ExecutionOutcome {
        tracing::info!(action = %action.describe(), "executing");
        match self.dispatch(action).await {
            Ok(()) => {
                if !self.settle_delay.is_zero() {
                    tokio::time::sleep(self.settle_delay).await;
                }
                ExecutionOutcome::Succeeded { message: format!("{} done", action.describe()) }
            }
            Err(e) => {
                let outcome = ExecutionOutcome::from_error(&e);
                if let ExecutionOutcome::Failed { kind, .. } = &outcome {
                    if *kind == FailureKind::BridgeError {
                        tracing::error!(error = %e, "bridge failure while executing");
                    } else {
                        tracing::warn!(error = %e, ?kind, "action failed");
                    }
                }
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::device::screenshot::solid_png;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_with: Mutex<Option<PilotError>>,
    }

    #[derive(Clone, Default)]
    struct FakeBridge(Arc<Recorder>);

    impl FakeBridge {
        fn log(&self, call: String) -> PilotResult<()> {
            self.0.calls.lock().unwrap().push(call);
            match self.0.fail_with.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.0.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceBridge for FakeBridge {
        async fn capture_screen(&self) -> PilotResult<Vec<u8>> {
            self.log("capture".into())?;
            Ok(solid_png(100, 200))
        }
        async fn current_app(&self) -> PilotResult<String> {
            Err(PilotError::BridgeError("dumpsys unavailable".into()))
        }
        async fn tap(&self, x: u32, y: u32) -> PilotResult<()> {
            self.log(format!("tap {x} {y}"))
        }
        async fn swipe(&self, x1: u32, y1: u32, x2: u32, y2: u32, d: u32) -> PilotResult<()> {
            self.log(format!("swipe {x1} {y1} {x2} {y2} {d}"))
        }
        async fn type_text(&self, text: &str) -> PilotResult<()> {
            self.log(format!("type {text}"))
        }
        async fn press_key(&self, keycode: &str) -> PilotResult<()> {
            self.log(format!("key {keycode}"))
        }
        async fn launch(&self, target: &str) -> PilotResult<()> {
            self.log(format!("launch {target}"))
        }
    }

    #[tokio::test]
    async fn capture_builds_observation_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = FakeBridge::default();
        let mut ctrl = BridgeController::new(bridge.clone(), Some(dir.path().to_path_buf()), Duration::ZERO);

        let obs = ctrl.capture(3).await.unwrap();
        assert_eq!(obs.bounds(), ScreenBounds::new(100, 200));
        assert_eq!(obs.device.current_app, "unknown");
        let path = obs.screenshot_path.clone().unwrap();
        assert!(path.ends_with("step_0003.png"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn dispatches_each_action_kind() {
        let bridge = FakeBridge::default();
        let mut ctrl = BridgeController::new(bridge.clone(), None, Duration::ZERO);
        ctrl.capture(0).await.unwrap();

        let actions = [
            Action::Tap { x: 5, y: 6 },
            Action::Swipe { x1: 1, y1: 2, x2: 3, y2: 4, duration_ms: 250 },
            Action::SwipeUp,
            Action::SwipeDown,
            Action::Type { text: "hi there".into() },
            Action::Back,
            Action::Home,
            Action::LaunchApp { target: "com.android.chrome".into() },
        ];
        for action in &actions {
            assert!(ctrl.execute(action).await.is_success(), "{action:?}");
        }
        assert_eq!(
            bridge.calls(),
            vec![
                "capture",
                "tap 5 6",
                "swipe 1 2 3 4 250",
                "swipe 50 140 50 40 300",
                "swipe 50 60 50 160 300",
                "type hi there",
                "key KEYCODE_BACK",
                "key KEYCODE_HOME",
                "launch com.android.chrome",
            ]
        );
    }

    #[tokio::test]
    async fn bridge_failure_becomes_outcome_without_retry() {
        let bridge = FakeBridge::default();
        *bridge.0.fail_with.lock().unwrap() = Some(PilotError::BridgeError("input died".into()));
        let mut ctrl = BridgeController::new(bridge.clone(), None, Duration::ZERO);

        let outcome = ctrl.execute(&Action::Tap { x: 1, y: 1 }).await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed { kind: FailureKind::BridgeError, .. }
        ));
        assert_eq!(bridge.calls(), vec!["tap 1 1"]);
    }

    #[tokio::test]
    async fn scroll_before_capture_is_invalid_target() {
        let mut ctrl = BridgeController::new(FakeBridge::default(), None, Duration::ZERO);
        let outcome = ctrl.execute(&Action::SwipeUp).await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed { kind: FailureKind::InvalidTarget, .. }
        ));
    }
}
