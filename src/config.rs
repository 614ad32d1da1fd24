//! Runtime configuration.
//!
//! Loaded from a JSON file (`--config`), or from the `KA_RUNNER_CONFIG`
//! environment variable, or built entirely from defaults. A couple of
//! operational knobs can additionally be overridden by plain env vars.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// How the headless browser is launched.
    #[serde(default)]
    pub browser: BrowserSettings,

    /// Where the live-editor pages live and how long to wait for them.
    #[serde(default)]
    pub target: TargetConfig,

    /// Limits and defaults applied to every run.
    #[serde(default)]
    pub run: RunConfig,
}

/// Browser launch settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSettings {
    /// Path to a Chrome/Chromium binary. Auto-detected when absent.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Pass `--no-sandbox` (needed inside most containers).
    #[serde(default)]
    pub no_sandbox: bool,

    /// Extra command-line arguments for the browser process.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_seconds: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Bound on a graceful close before the process is killed instead.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_seconds: u64,

    /// Keep cross-origin iframes in the page's renderer process so that the
    /// output frame's execution context can be resolved from the page.
    #[serde(default = "default_true")]
    pub disable_site_isolation: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            no_sandbox: false,
            args: Vec::new(),
            launch_timeout_seconds: default_launch_timeout(),
            request_timeout_seconds: default_request_timeout(),
            close_timeout_seconds: default_close_timeout(),
            disable_site_isolation: true,
        }
    }
}

impl BrowserSettings {
    pub const fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_seconds)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub const fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_seconds)
    }
}

/// Location of the live-editor pages and landmark wait settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Base URL; the run environment slug is appended to it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// How long to wait for a DOM landmark before giving up.
    #[serde(default = "default_selector_timeout")]
    pub selector_timeout_ms: u64,

    /// Interval between predicate polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            selector_timeout_ms: default_selector_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl TargetConfig {
    pub const fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Inclusive numeric range with a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Bounds {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl Bounds {
    /// Clamp a caller-supplied value, substituting the default when absent.
    pub fn normalize(&self, value: Option<u32>) -> u32 {
        value.map_or(self.default, |v| v.max(self.min).min(self.max))
    }
}

/// Delay bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DelayBounds {
    pub min: u64,
    pub max: u64,
}

/// Animated capture settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AnimationConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Total sampling duration in milliseconds.
    #[serde(default = "default_animation_duration")]
    pub duration_ms: u64,

    /// Encoder quality, 1 (best) to 30 (fastest).
    #[serde(default = "default_quality")]
    pub quality: u32,

    #[serde(default = "default_animation_max")]
    pub max_width: u32,

    #[serde(default = "default_animation_max")]
    pub max_height: u32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            duration_ms: default_animation_duration(),
            quality: default_quality(),
            max_width: default_animation_max(),
            max_height: default_animation_max(),
        }
    }
}

impl AnimationConfig {
    /// Number of frames sampled over the configured duration.
    pub fn frame_count(&self) -> usize {
        let frames = self.duration_ms.saturating_mul(u64::from(self.fps)) / 1000;
        usize::try_from(frames).unwrap_or(usize::MAX).max(1)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// Log section budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LogLimits {
    /// Most recent lines considered for display.
    #[serde(default = "default_log_lines")]
    pub max_lines: usize,

    /// Maximum rendered length of the log section, in characters.
    #[serde(default = "default_log_budget")]
    pub budget: usize,
}

impl Default for LogLimits {
    fn default() -> Self {
        Self {
            max_lines: default_log_lines(),
            budget: default_log_budget(),
        }
    }
}

/// Limits and defaults applied to every run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_dimension")]
    pub width: Bounds,

    #[serde(default = "default_dimension")]
    pub height: Bounds,

    #[serde(default = "default_delay")]
    pub delay: DelayBounds,

    /// Outer deadline for a whole evaluation, regardless of run type.
    #[serde(default = "default_run_timeout")]
    pub timeout_seconds: u64,

    /// Bound on waiting for the output frame's completion message.
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_seconds: u64,

    #[serde(default)]
    pub animation: AnimationConfig,

    #[serde(default)]
    pub logs: LogLimits,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            width: default_dimension(),
            height: default_dimension(),
            delay: default_delay(),
            timeout_seconds: default_run_timeout(),
            completion_timeout_seconds: default_completion_timeout(),
            animation: AnimationConfig::default(),
            logs: LogLimits::default(),
        }
    }
}

impl RunConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub const fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_seconds)
    }

    pub fn width(&self, requested: Option<u32>) -> u32 {
        self.width.normalize(requested)
    }

    pub fn height(&self, requested: Option<u32>) -> u32 {
        self.height.normalize(requested)
    }

    /// Clamp a capture delay (milliseconds), treating absence as the minimum.
    pub fn delay(&self, requested: Option<u64>) -> Duration {
        let ms = requested.map_or(self.delay.min, |d| d.max(self.delay.min).min(self.delay.max));
        Duration::from_millis(ms)
    }

    /// Animated captures fall back to the default size when a dimension is
    /// larger than the animation limits.
    pub const fn animation_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let width = if width > self.animation.max_width {
            self.width.default
        } else {
            width
        };
        let height = if height > self.animation.max_height {
            self.height.default
        } else {
            height
        };
        (width, height)
    }
}

impl Config {
    /// Load configuration from the `KA_RUNNER_CONFIG` environment variable,
    /// falling back to defaults when it is not set.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("KA_RUNNER_CONFIG") {
            Ok(json) => Self::from_json(&json).context("Failed to parse KA_RUNNER_CONFIG")?,
            Err(_) => {
                debug!("KA_RUNNER_CONFIG not set, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_json(&json)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration file");
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    /// Apply `CHROME_PATH` and `RUN_TIMEOUT_SECONDS` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CHROME_PATH") {
            if !path.is_empty() {
                self.browser.executable = Some(PathBuf::from(path));
            }
        }
        if let Some(secs) = std::env::var("RUN_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.run.timeout_seconds = secs;
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_launch_timeout() -> u64 {
    20
}

const fn default_close_timeout() -> u64 {
    10
}

const fn default_request_timeout() -> u64 {
    30
}

fn default_base_url() -> String {
    "https://www.khanacademy.org/computer-programming/new".into()
}

const fn default_selector_timeout() -> u64 {
    30_000
}

const fn default_poll_interval() -> u64 {
    100
}

const fn default_dimension() -> Bounds {
    Bounds {
        min: 1,
        max: 1200,
        default: 400,
    }
}

const fn default_delay() -> DelayBounds {
    DelayBounds { min: 0, max: 10_000 }
}

const fn default_run_timeout() -> u64 {
    45
}

const fn default_completion_timeout() -> u64 {
    30
}

const fn default_fps() -> u32 {
    15
}

const fn default_animation_duration() -> u64 {
    5000
}

const fn default_quality() -> u32 {
    10
}

const fn default_animation_max() -> u32 {
    600
}

const fn default_log_lines() -> usize {
    10
}

const fn default_log_budget() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let config = Config::from_json("{}").unwrap();

        assert!(config.browser.headless);
        assert!(config.browser.disable_site_isolation);
        assert!(config.browser.executable.is_none());
        assert_eq!(config.browser.close_timeout(), Duration::from_secs(10));
        assert_eq!(config.run.width.default, 400);
        assert_eq!(config.run.timeout(), Duration::from_secs(45));
        assert_eq!(config.run.animation.fps, 15);
        assert_eq!(config.run.logs.max_lines, 10);
        assert_eq!(config.target.selector_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_sections_keep_field_defaults() {
        let json = r#"{
            "browser": { "no_sandbox": true, "args": ["--mute-audio"] },
            "run": {
                "timeout_seconds": 10,
                "animation": { "fps": 10 }
            }
        }"#;

        let config = Config::from_json(json).unwrap();

        assert!(config.browser.no_sandbox);
        assert!(config.browser.headless);
        assert_eq!(config.browser.args, vec!["--mute-audio"]);
        assert_eq!(config.run.timeout_seconds, 10);
        assert_eq!(config.run.animation.fps, 10);
        assert_eq!(config.run.animation.duration_ms, 5000);
        assert_eq!(config.run.completion_timeout_seconds, 30);
    }

    #[test]
    fn dimensions_are_clamped() {
        let run = RunConfig::default();
        assert_eq!(run.width(None), 400);
        assert_eq!(run.width(Some(0)), 1);
        assert_eq!(run.width(Some(50_000)), 1200);
        assert_eq!(run.height(Some(250)), 250);
    }

    #[test]
    fn delay_defaults_to_minimum_and_is_clamped() {
        let run = RunConfig::default();
        assert_eq!(run.delay(None), Duration::ZERO);
        assert_eq!(run.delay(Some(500)), Duration::from_millis(500));
        assert_eq!(run.delay(Some(600_000)), Duration::from_secs(10));
    }

    #[test]
    fn oversized_animation_falls_back_to_default() {
        let run = RunConfig::default();
        assert_eq!(run.animation_dimensions(600, 300), (600, 300));
        assert_eq!(run.animation_dimensions(900, 300), (400, 300));
        assert_eq!(run.animation_dimensions(100, 1000), (100, 400));
    }

    #[test]
    fn animation_frame_count() {
        let animation = AnimationConfig::default();
        assert_eq!(animation.frame_count(), 75);
        assert_eq!(animation.frame_interval(), Duration::from_secs(1) / 15);

        let tiny = AnimationConfig {
            duration_ms: 10,
            fps: 15,
            ..AnimationConfig::default()
        };
        assert_eq!(tiny.frame_count(), 1);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"target": {"base_url": "http://localhost:8080/new", "poll_interval_ms": 5}}"#,
        )
        .unwrap();

        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.target.base_url, "http://localhost:8080/new");
        assert_eq!(config.target.poll_interval(), Duration::from_millis(5));
    }

    #[test]
    fn load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_path(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
