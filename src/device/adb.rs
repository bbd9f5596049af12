//! ADB implementation of [`DeviceBridge`].
//!
//! Every call spawns one `adb` process with `kill_on_drop`, so a timed-out
//! command never outlives its deadline.
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::config::DeviceConfig;
use crate::device::bridge::DeviceBridge;
use crate::device::screenshot::is_png;
use crate::errors::{PilotError, PilotResult};

pub struct AdbBridge {
    adb_path: String,
    serial: Option<String>,
    timeout: Duration,
}

impl AdbBridge {
    pub fn new(adb_path: impl Into<String>, serial: Option<String>, timeout: Duration) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
            timeout,
        }
    }

    pub fn from_config(cfg: &DeviceConfig) -> Self {
        Self::new(cfg.adb_path.clone(), cfg.serial.clone(), cfg.command_timeout())
    }

    async fn run(&self, args: &[&str]) -> PilotResult<Vec<u8>> {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let rendered = args.join(" ");
        tracing::debug!(adb = %self.adb_path, args = %rendered, "adb command");

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PilotError::DeviceUnavailable(format!(
                "adb executable `{}` not found",
                self.adb_path
            )),
            _ => PilotError::BridgeError(format!("failed to spawn adb: {e}")),
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PilotError::Timeout(format!("`adb {rendered}` exceeded {:?}", self.timeout)))?
            .map_err(|e| PilotError::BridgeError(format!("adb {rendered}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(classify_failure(&rendered, detail.trim()));
        }
        Ok(output.stdout)
    }

    async fn shell(&self, args: &[&str]) -> PilotResult<String> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let out = self.run(&full).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn resolve_package(&self, target: &str) -> PilotResult<String> {
        if target.contains('.') && !target.contains(char::is_whitespace) {
            return Ok(target.to_string());
        }
        let listing = self.shell(&["pm", "list", "packages"]).await?;
        let packages = parse_package_list(&listing);
        match_package(&packages, target).ok_or_else(|| {
            PilotError::InvalidTarget(format!("no installed package matches `{target}`"))
        })
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn capture_screen(&self) -> PilotResult<Vec<u8>> {
        let bytes = self
            .run(&["exec-out", "screencap", "-p"])
            .await
            .map_err(|e| match e {
                PilotError::BridgeError(msg) => PilotError::CaptureFailed(msg),
                other => other,
            })?;
        if !is_png(&bytes) {
            return Err(PilotError::CaptureFailed(format!(
                "screencap returned {} bytes that are not a PNG",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    async fn current_app(&self) -> PilotResult<String> {
        let dump = self.shell(&["dumpsys", "window"]).await?;
        Ok(parse_focused_app(&dump).unwrap_or_else(|| "unknown".to_string()))
    }

    async fn tap(&self, x: u32, y: u32) -> PilotResult<()> {
        self.shell(&["input", "tap", &x.to_string(), &y.to_string()]).await?;
        Ok(())
    }

    async fn swipe(&self, x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u32) -> PilotResult<()> {
        let args = [x1, y1, x2, y2, duration_ms].map(|v| v.to_string());
        let mut full = vec!["input", "swipe"];
        full.extend(args.iter().map(String::as_str));
        self.shell(&full).await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> PilotResult<()> {
        let arg = input_text_arg(text)?;
        self.shell(&["input", "text", &arg]).await?;
        Ok(())
    }

    async fn press_key(&self, keycode: &str) -> PilotResult<()> {
        self.shell(&["input", "keyevent", keycode]).await?;
        Ok(())
    }

    async fn launch(&self, target: &str) -> PilotResult<()> {
        let package = self.resolve_package(target).await?;
        let out = self
            .shell(&["monkey", "-p", &package, "-c", "android.intent.category.LAUNCHER", "1"])
            .await?;
        if out.contains("No activities found") || out.contains("monkey aborted") {
            return Err(PilotError::InvalidTarget(format!(
                "package `{package}` has no launcher activity"
            )));
        }
        tracing::info!(package = %package, "app launched");
        Ok(())
    }
}

fn classify_failure(command: &str, detail: &str) -> PilotError {
    let lower = detail.to_ascii_lowercase();
    let unreachable = ["no devices", "device offline", "unauthorized", "no emulators"]
        .iter()
        .any(|needle| lower.contains(needle))
        || (lower.contains("device") && lower.contains("not found"));
    if unreachable {
        PilotError::DeviceUnavailable(detail.to_string())
    } else {
        PilotError::BridgeError(format!("`adb {command}` failed: {detail}"))
    }
}

/// Builds the `input text` argument, refusing what it cannot type safely.
///
/// `adb shell` joins its arguments into one device-side `sh` command line,
/// so control characters would split it into further commands. `input`
/// turns `%s` into a space and has no escape for a literal `%`.
fn input_text_arg(text: &str) -> PilotResult<String> {
    if !text.is_ascii() {
        return Err(PilotError::InvalidTarget(
            "adb `input text` cannot type non-ASCII characters".into(),
        ));
    }
    if text.chars().any(|c| c.is_ascii_control()) {
        return Err(PilotError::InvalidTarget(
            "adb `input text` cannot type control characters".into(),
        ));
    }
    if text.contains('%') {
        return Err(PilotError::InvalidTarget(
            "adb `input text` cannot type a literal `%`".into(),
        ));
    }
    Ok(escape_input_text(text))
}

/// Spaces become `%s`; shell metacharacters are backslash-escaped for the
/// device-side shell. Callers go through [`input_text_arg`].
fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        match c {
            ' ' => out.push_str("%s"),
            '\\' | '\'' | '"' | '`' | '$' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*' | '~'
            | '#' | '!' | '?' | '[' | ']' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn focus_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:mCurrentFocus|mFocusedApp)=.*?\s([A-Za-z][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)+)/")
            .expect("static regex")
    })
}

fn parse_focused_app(dump: &str) -> Option<String> {
    dump.lines()
        .find_map(|line| focus_re().captures(line))
        .map(|c| c[1].to_string())
}

fn parse_package_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .map(str::to_string)
        .collect()
}

/// Picks the package for a human-readable app name: an exact match on the
/// last package segment wins over a substring match anywhere.
fn match_package(packages: &[String], name: &str) -> Option<String> {
    let needle: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if needle.is_empty() {
        return None;
    }
    let last_segment = |p: &String| p.rsplit('.').next().map(str::to_ascii_lowercase);
    packages
        .iter()
        .find(|p| last_segment(*p).as_deref() == Some(needle.as_str()))
        .or_else(|| packages.iter().find(|p| p.to_ascii_lowercase().contains(&needle)))
        .cloned()
}
