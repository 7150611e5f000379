use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::deserialize_duration;

fn default_poll_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_settle() -> Duration {
    Duration::from_secs(2)
}

fn default_settle_slow() -> Duration {
    Duration::from_secs(3)
}

fn default_reason_settle() -> Duration {
    Duration::from_millis(500)
}

fn default_highlight_pause() -> Duration {
    Duration::from_millis(500)
}

fn default_locate_budget() -> Duration {
    Duration::from_secs(5)
}

fn default_indicator_budget() -> Duration {
    Duration::from_secs(3)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_overall_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_step_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_reinject_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_navigations() -> u32 {
    3
}

fn default_max_clicks() -> u32 {
    5
}

/// Every delay, budget, and bound in the engine.
///
/// Production defaults match the flows these were tuned against; tests
/// shrink them to keep timer scenarios fast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Locator poll interval.
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    /// Delay after load-complete before touching the page.
    #[serde(deserialize_with = "deserialize_duration")]
    pub settle: Duration,
    /// Same, for services flagged `slow_render`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub settle_slow: Duration,
    /// Pause after ticking a cancellation-reason control.
    #[serde(deserialize_with = "deserialize_duration")]
    pub reason_settle: Duration,
    /// Pause between highlighting an element and clicking it.
    #[serde(deserialize_with = "deserialize_duration")]
    pub highlight_pause: Duration,
    /// Window after a click in which a URL change counts as navigation.
    #[serde(deserialize_with = "deserialize_duration")]
    pub nav_settle: Duration,
    /// Default locator budget for cancel controls.
    #[serde(deserialize_with = "deserialize_duration")]
    pub locate_budget: Duration,
    /// Locator budget for status indicators.
    #[serde(deserialize_with = "deserialize_duration")]
    pub indicator_budget: Duration,
    /// Hard cap on one status probe, tab open to verdict.
    #[serde(deserialize_with = "deserialize_duration")]
    pub probe_timeout: Duration,
    /// Per-step deadline, reset on every page load.
    #[serde(deserialize_with = "deserialize_duration")]
    pub step_timeout: Duration,
    /// Whole-session deadline.
    #[serde(deserialize_with = "deserialize_duration")]
    pub overall_timeout: Duration,
    /// Pause between greedy clicks on the same page.
    #[serde(deserialize_with = "deserialize_duration")]
    pub step_delay: Duration,
    /// Pause between re-injecting page logic and retrying a step.
    #[serde(deserialize_with = "deserialize_duration")]
    pub reinject_delay: Duration,
    /// Navigation hops allowed before giving up (sequence policy).
    pub max_navigations: u32,
    /// Clicks allowed before giving up (greedy policy).
    pub max_clicks: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            settle: default_settle(),
            settle_slow: default_settle_slow(),
            reason_settle: default_reason_settle(),
            highlight_pause: default_highlight_pause(),
            nav_settle: default_settle(),
            locate_budget: default_locate_budget(),
            indicator_budget: default_indicator_budget(),
            probe_timeout: default_probe_timeout(),
            step_timeout: default_step_timeout(),
            overall_timeout: default_overall_timeout(),
            step_delay: default_step_delay(),
            reinject_delay: default_reinject_delay(),
            max_navigations: default_max_navigations(),
            max_clicks: default_max_clicks(),
        }
    }
}

impl Timing {
    /// Settle delay for a given service.
    pub fn settle_for(&self, slow_render: bool) -> Duration {
        if slow_render {
            self.settle_slow
        } else {
            self.settle
        }
    }
}

/// Which step-selection strategy drives a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyChoice {
    /// Sequence when the descriptor defines one, greedy otherwise.
    #[default]
    Auto,
    Sequence,
    Greedy,
}

/// What to report when the selector catalog is exhausted off a
/// confirmation URL but at least one step already executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustedPolicy {
    #[default]
    Failure,
    Success,
}

/// Live browser settings, read by the CDP host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run Chrome headless. Cancellations are easier to supervise headed.
    pub headless: bool,
    /// Explicit Chrome/Chromium executable; discovered when unset.
    pub chrome_path: Option<String>,
    /// Profile directory; a throwaway temp dir when unset.
    pub user_data_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            user_data_dir: None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Path to data directory. If relative, resolved from config file location.
    /// If not specified, defaults to the config file's directory.
    pub data_dir: Option<PathBuf>,

    /// Replacement service catalog; the built-in table when unset.
    pub catalog_path: Option<PathBuf>,

    /// Step-selection strategy.
    pub policy: PolicyChoice,

    /// Outcome when steps ran but no further control can be found.
    pub on_exhausted: ExhaustedPolicy,

    /// Engine delays and bounds.
    pub timing: Timing,

    /// Live browser settings.
    pub browser: BrowserConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Resolve a configured path against the config file's directory.
    fn resolve_path(config_dir: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            config_dir.join(path)
        }
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to
    /// `config_dir`. If not set, returns `config_dir`.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) => Self::resolve_path(config_dir, data_dir),
            None => config_dir.to_path_buf(),
        }
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub catalog_path: Option<PathBuf>,
    pub policy: PolicyChoice,
    pub on_exhausted: ExhaustedPolicy,
    pub timing: Timing,
    pub browser: BrowserConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./cancelkit.toml` if it exists in the current directory
/// 2. `<data_dir>/cancelkit/cancelkit.toml`
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("cancelkit.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("cancelkit").join("cancelkit.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Load and resolve config from a file path.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        Ok(Self::resolve(config, config_dir))
    }

    /// Load config, falling back to defaults if the file doesn't exist.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            let config_path = if config_path.is_relative() {
                std::env::current_dir()
                    .context("Failed to get current directory")?
                    .join(config_path)
            } else {
                config_path.to_path_buf()
            };

            let config_dir = config_path
                .parent()
                .context("Config path has no parent directory")?;

            Ok(Self::resolve(Config::default(), config_dir))
        }
    }

    fn resolve(config: Config, config_dir: &Path) -> Self {
        let data_dir = config.resolve_data_dir(config_dir);
        let catalog_path = config
            .catalog_path
            .as_ref()
            .map(|p| Config::resolve_path(config_dir, p));

        Self {
            data_dir,
            catalog_path,
            policy: config.policy,
            on_exhausted: config.on_exhausted,
            timing: config.timing,
            browser: config.browser,
        }
    }
}
