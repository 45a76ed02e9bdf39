use crate::error::{ControlError, Result};
use crate::global_variables::{
    DEFAULT_AUTO_CLEAR_SECS, DEFAULT_CORRIDOR_GREEN_SECS, DEFAULT_CYCLE_TIME_SECS,
    DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_LOG_DIR, ENV_AUTO_CLEAR, ENV_CONFIG_PATH,
    ENV_CORRIDOR_GREEN, ENV_CYCLE_TIME, ENV_LOG_DIR,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing and mirror settings for the signal controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Seconds between scheduler ticks.
    pub cycle_time_secs: u64,
    /// Seconds each corridor intersection is held green.
    pub corridor_green_secs: u64,
    /// Safety-net timeout after the corridor reaches its last intersection.
    pub auto_clear_secs: u64,
    pub lock_timeout_ms: u64,
    /// Re-run the scheduler right after a traffic sample is recorded.
    pub retick_on_sample: bool,
    pub log_dir: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cycle_time_secs: DEFAULT_CYCLE_TIME_SECS,
            corridor_green_secs: DEFAULT_CORRIDOR_GREEN_SECS,
            auto_clear_secs: DEFAULT_AUTO_CLEAR_SECS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            retick_on_sample: true,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

impl ControllerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ControlError::Config(format!("reading {}: {}", path.display(), e)))?;
        let config: ControllerConfig = serde_json::from_str(&contents)
            .map_err(|e| ControlError::Config(format!("parsing {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the file named by `TRAFFIC_CONFIG` if set, then applies env overrides.
    pub fn from_env_or_default() -> Result<Self> {
        let mut config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_CYCLE_TIME) {
            self.cycle_time_secs = parse_secs(ENV_CYCLE_TIME, &v)?;
        }
        if let Some(v) = lookup(ENV_CORRIDOR_GREEN) {
            self.corridor_green_secs = parse_secs(ENV_CORRIDOR_GREEN, &v)?;
        }
        if let Some(v) = lookup(ENV_AUTO_CLEAR) {
            self.auto_clear_secs = parse_secs(ENV_AUTO_CLEAR, &v)?;
        }
        if let Some(v) = lookup(ENV_LOG_DIR) {
            self.log_dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("cycle_time_secs", self.cycle_time_secs),
            ("corridor_green_secs", self.corridor_green_secs),
            ("auto_clear_secs", self.auto_clear_secs),
            ("lock_timeout_ms", self.lock_timeout_ms),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ControlError::Config(format!("{} must be greater than zero", name)));
            }
        }
        // Corridor green time is reported per approach as u32 seconds.
        if u32::try_from(self.corridor_green_secs).is_err() {
            return Err(ControlError::Config(format!(
                "corridor_green_secs must be at most {}",
                u32::MAX
            )));
        }
        Ok(())
    }

    pub fn cycle_time(&self) -> Duration {
        Duration::from_secs(self.cycle_time_secs)
    }

    pub fn corridor_green_time(&self) -> Duration {
        Duration::from_secs(self.corridor_green_secs)
    }

    pub fn auto_clear_timeout(&self) -> Duration {
        Duration::from_secs(self.auto_clear_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ControlError::Config(format!("{} must be a whole number of seconds, got '{}'", key, value)))
}
