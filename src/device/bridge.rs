use async_trait::async_trait;

use crate::errors::PilotResult;

pub const KEYCODE_BACK: &str = "KEYCODE_BACK";
pub const KEYCODE_HOME: &str = "KEYCODE_HOME";

/// Primitive device operations. Every call blocks until the device has
/// acknowledged it or the implementation's own timeout expires.
///
/// Implementations report `DeviceUnavailable` when the device cannot be
/// reached at all, `Timeout` when a call exceeds its deadline,
/// `InvalidTarget` when the request itself cannot be honoured, and
/// `BridgeError` for anything else.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// PNG of the current screen.
    async fn capture_screen(&self) -> PilotResult<Vec<u8>>;

    /// Package name of the foreground app.
    async fn current_app(&self) -> PilotResult<String>;

    async fn tap(&self, x: u32, y: u32) -> PilotResult<()>;

    async fn swipe(&self, x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u32) -> PilotResult<()>;

    async fn type_text(&self, text: &str) -> PilotResult<()>;

    async fn press_key(&self, keycode: &str) -> PilotResult<()>;

    /// Launches an app by package name or human-readable name.
    async fn launch(&self, target: &str) -> PilotResult<()>;
}
