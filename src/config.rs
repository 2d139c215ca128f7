//! Compositor configuration
//!
//! Defaults match a stock Xvfb install. Hosts may pass a JSON document, and
//! a few `XMIRROR_*` environment variables override individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Screen geometry the headless server is started with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScreenConfig {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            depth: 24,
        }
    }
}

impl ScreenConfig {
    /// Parse `WxHxD`, e.g. `1920x1080x24`
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split('x').map(str::trim);
        let width = parts.next()?.parse().ok()?;
        let height = parts.next()?.parse().ok()?;
        let depth = parts.next()?.parse().ok()?;
        if parts.next().is_some() || width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            width,
            height,
            depth,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Headless X server executable
    pub server_binary: String,
    pub screen: ScreenConfig,
    /// First display number tried
    pub display_first: u32,
    /// Last display number tried (inclusive)
    pub display_last: u32,
    /// Directory holding `.X{n}-lock` files
    pub lock_dir: PathBuf,
    /// Directory holding `X{n}` sockets
    pub socket_dir: PathBuf,
    pub startup_attempts: u32,
    pub startup_poll_ms: u64,
    /// Polls after SIGTERM before falling back to SIGKILL
    pub shutdown_polls: u32,
    /// Tracking filter threshold in pixels
    pub min_window_size: u32,
    pub extra_server_args: Vec<String>,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            server_binary: "Xvfb".to_string(),
            screen: ScreenConfig::default(),
            display_first: 1,
            display_last: 99,
            lock_dir: PathBuf::from("/tmp"),
            socket_dir: PathBuf::from("/tmp/.X11-unix"),
            startup_attempts: 50,
            startup_poll_ms: 100,
            shutdown_polls: 10,
            min_window_size: 10,
            extra_server_args: Vec::new(),
        }
    }
}

impl CompositorConfig {
    /// Defaults with `XMIRROR_SERVER_BIN`, `XMIRROR_RESOLUTION` and
    /// `XMIRROR_DISPLAY_RANGE` applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply the `XMIRROR_*` overrides on top of this configuration
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(binary) = lookup("XMIRROR_SERVER_BIN").filter(|b| !b.is_empty()) {
            self.server_binary = binary;
        }

        if let Some(value) = lookup("XMIRROR_RESOLUTION") {
            match ScreenConfig::parse(&value) {
                Some(screen) => self.screen = screen,
                None => warn!("Ignoring XMIRROR_RESOLUTION={:?}, expected WxHxD", value),
            }
        }

        if let Some(value) = lookup("XMIRROR_DISPLAY_RANGE") {
            match parse_range(&value) {
                Some((first, last)) => {
                    self.display_first = first;
                    self.display_last = last;
                }
                None => warn!("Ignoring XMIRROR_DISPLAY_RANGE={:?}, expected first-last", value),
            }
        }
    }

    pub fn startup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.startup_poll_ms)
    }

    pub fn lock_path(&self, display: u32) -> PathBuf {
        self.lock_dir.join(format!(".X{}-lock", display))
    }

    pub fn socket_path(&self, display: u32) -> PathBuf {
        self.socket_dir.join(format!("X{}", display))
    }

    /// Arguments passed to the server binary for a display
    pub fn server_args(&self, display: u32) -> Vec<String> {
        let mut args = vec![
            format!(":{}", display),
            // No access control: only local clients we start ourselves connect
            "-ac".to_string(),
            "-screen".to_string(),
            "0".to_string(),
            format!(
                "{}x{}x{}",
                self.screen.width, self.screen.height, self.screen.depth
            ),
            "+extension".to_string(),
            "Composite".to_string(),
        ];
        args.extend(self.extra_server_args.iter().cloned());
        args
    }

    pub fn display_artifacts_exist(&self, display: u32) -> bool {
        exists(&self.lock_path(display)) || exists(&self.socket_path(display))
    }
}

fn exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(true)
}

fn parse_range(value: &str) -> Option<(u32, u32)> {
    let (first, last) = value.split_once('-')?;
    let first = first.trim().parse().ok()?;
    let last = last.trim().parse().ok()?;
    (first <= last).then_some((first, last))
}
