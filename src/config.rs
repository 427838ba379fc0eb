//! Configuration loading and persistence.
//!
//! Reads `config.json` from [`Config::config_dir`] and layers `LAUNCHLINK_*`
//! environment variables on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::constants::{
    DEFAULT_REFRESH_RATE, DEFAULT_SEND_BUFFER, DEFAULT_STATE_TIMEOUT, DEFAULT_STATE_WARNING,
};
use crate::protocol::PROTOCOL_VERSION;
use crate::state::StateTimings;
use crate::wire::LengthPrefix;

/// Configuration for launchlink.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Launcher address for app → launcher messages.
    pub connect_addr: String,
    /// Local address the launcher dials for launcher → app commands.
    pub listen_addr: String,
    /// Protocol version announced in `VERSION`.
    pub protocol_version: u32,
    /// Frame rate announced in `REFRESHRATE`.
    pub refresh_rate: u32,
    /// Send buffer for the outbound socket, in bytes.
    pub send_buffer: usize,
    /// Header width of launcher → app frames.
    pub inbound_prefix: LengthPrefix,
    /// Header width of app → launcher frames.
    pub outbound_prefix: LengthPrefix,
    /// Seconds before an unresolved request starts logging.
    pub state_warning_secs: f64,
    /// Seconds before an unresolved request is abandoned.
    pub state_timeout_secs: f64,
    /// Whether a timed-out connect-state watch still sends `APPINITIALSTATESET`.
    pub release_on_watch_timeout: bool,
    /// State applied when the launcher connects without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_initial_state: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_addr: "127.0.0.1:4785".to_string(),
            listen_addr: "127.0.0.1:4786".to_string(),
            protocol_version: PROTOCOL_VERSION,
            refresh_rate: DEFAULT_REFRESH_RATE,
            send_buffer: DEFAULT_SEND_BUFFER,
            inbound_prefix: LengthPrefix::Three,
            outbound_prefix: LengthPrefix::Four,
            state_warning_secs: DEFAULT_STATE_WARNING.as_secs_f64(),
            state_timeout_secs: DEFAULT_STATE_TIMEOUT.as_secs_f64(),
            release_on_watch_timeout: true,
            default_initial_state: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/launchlink-test`
    /// 2. `LAUNCHLINK_CONFIG_DIR` env var: explicit override (`~` expanded)
    /// 3. `LAUNCHLINK_ENV=test`: `tmp/launchlink-test`
    /// 4. Default: platform config dir + `launchlink`
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/launchlink-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("LAUNCHLINK_CONFIG_DIR") {
                    PathBuf::from(shellexpand::tilde(&dir).into_owned())
                } else if crate::env::is_test_mode() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/launchlink-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("launchlink")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default configuration: {e:#}");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid config file {}", config_path.display()))
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `LAUNCHLINK_*` overrides from `lookup`. Unparseable numbers
    /// are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("LAUNCHLINK_CONNECT_ADDR") {
            self.connect_addr = addr;
        }

        if let Some(addr) = lookup("LAUNCHLINK_LISTEN_ADDR") {
            self.listen_addr = addr;
        }

        if let Some(rate) = lookup("LAUNCHLINK_REFRESH_RATE") {
            if let Ok(rate) = rate.parse::<u32>() {
                self.refresh_rate = rate;
            }
        }

        if let Some(secs) = lookup("LAUNCHLINK_STATE_WARNING_SECS") {
            if let Ok(secs) = secs.parse::<f64>() {
                self.state_warning_secs = secs;
            }
        }

        if let Some(secs) = lookup("LAUNCHLINK_STATE_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<f64>() {
                self.state_timeout_secs = secs;
            }
        }

        if let Some(state) = lookup("LAUNCHLINK_DEFAULT_STATE") {
            self.default_initial_state = (!state.is_empty()).then_some(state);
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Ok(())
    }

    /// Reconciler windows derived from this configuration.
    pub fn state_timings(&self) -> StateTimings {
        StateTimings {
            warning: secs_to_duration(self.state_warning_secs, DEFAULT_STATE_WARNING),
            timeout: secs_to_duration(self.state_timeout_secs, DEFAULT_STATE_TIMEOUT),
            release_watch_on_timeout: self.release_on_watch_timeout,
        }
    }
}

/// Converts fractional seconds, falling back for negative or non-finite input.
pub fn secs_to_duration(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}
