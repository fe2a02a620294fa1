//! Runtime configuration
//!
//! Loaded from a JSON file at startup. Every key is optional; missing keys
//! fall back to the defaults below, and a missing file means an
//! all-default configuration. Unknown keys are ignored so older and newer
//! builds can share a config file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::link::DEFAULT_BAUD_RATE;
use crate::power::DEFAULT_SHUTDOWN_DELAY_SECS;

/// Top-level configuration for the telemetry core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CockpitConfig {
    /// Serial device for the vehicle link
    pub serial_port: String,
    /// Link baud rate
    pub serial_baud: u32,
    /// Run from simulated data instead of hardware
    pub demo_mode: bool,
    /// Seconds between ignition loss and power-off
    pub shutdown_delay_secs: u32,
    /// Fuel tank capacity in liters, for distance-to-empty
    pub tank_capacity_l: f64,
    /// Branch the update service tracks
    pub update_branch: String,
    /// Where the installed software lives. `None` means the current
    /// working directory.
    pub install_dir: Option<PathBuf>,
}

impl Default for CockpitConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            serial_baud: DEFAULT_BAUD_RATE,
            demo_mode: false,
            shutdown_delay_secs: DEFAULT_SHUTDOWN_DELAY_SECS,
            tank_capacity_l: 50.0,
            update_branch: "main".to_string(),
            install_dir: None,
        }
    }
}

impl CockpitConfig {
    /// Load configuration from `path`. A missing file yields the defaults;
    /// a present but malformed file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}
