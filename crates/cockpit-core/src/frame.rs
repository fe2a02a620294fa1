//! Telemetry frame codec
//!
//! The bridge firmware speaks newline-delimited JSON. Each inbound line is
//! one complete telemetry record with optional `obd` and `chg` sub-sections;
//! outbound commands are single-level records with a mandatory `cmd` key.
//!
//! Decode failure is not an error: a malformed or truncated line is dropped
//! and the next frame restores the state. The aggregator only needs eventual
//! consistency, so the codec never surfaces parse errors to callers.

use serde::{Deserialize, Serialize};

/// Core and extended OBD readings, as reported in the `obd` sub-section.
///
/// Every field is optional: the firmware only includes the PIDs it managed
/// to poll during the current cycle.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ObdReadings {
    /// Vehicle speed, km/h
    pub spd: Option<f64>,
    /// Engine speed, RPM
    pub rpm: Option<f64>,
    /// Engine coolant temperature, °C
    pub ect: Option<f64>,
    /// Throttle position, %
    pub thr: Option<f64>,
    /// Calculated engine load, %
    pub load: Option<f64>,
    /// Fuel consumption rate, L/h
    pub fuel_rate: Option<f64>,
    /// Fuel tank level, %
    pub fuel_lvl: Option<f64>,
    /// Mass air flow, g/s
    pub maf: Option<f64>,
    /// Intake air temperature, °C
    pub iat: Option<f64>,
    /// Engine oil temperature, °C
    pub oil_t: Option<f64>,
    /// Ignition timing advance, ° BTDC
    pub timing: Option<f64>,
    /// Oxygen sensor voltage, V
    pub o2v: Option<f64>,
    /// Fuel rail pressure, kPa
    pub fuel_p: Option<f64>,
}

/// Charger telemetry, as reported in the `chg` sub-section.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ChargerReadings {
    /// Pack voltage, V
    pub v: Option<f64>,
    /// Pack current, A
    pub a: Option<f64>,
    /// Commanded charge rate, A
    pub rate: Option<f64>,
    /// Temperature probe 1, °C
    pub t1: Option<f64>,
    /// Temperature probe 2, °C
    pub t2: Option<f64>,
    /// Ambient temperature, °C
    pub amb: Option<f64>,
    /// Charger output enabled
    pub en: Option<bool>,
}

/// One complete inbound telemetry record.
///
/// Sub-sections and the DTC list are sparse: absent keys leave the prior
/// aggregate value untouched. The link-health flags are the exception:
/// they are authoritative in every frame, and absence means the bus is down.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TelemetryFrame {
    /// OBD sensor readings
    #[serde(default)]
    pub obd: ObdReadings,
    /// Charger readings
    #[serde(default)]
    pub chg: ChargerReadings,
    /// CAN bus link healthy this cycle
    #[serde(default)]
    pub can: bool,
    /// RS-485 link healthy this cycle
    #[serde(default)]
    pub rs485: bool,
    /// Ignition (ACC) sense. Defaults to on so a frame from firmware that
    /// does not report ignition never starts a shutdown countdown.
    #[serde(default = "default_ignition")]
    pub ign: bool,
    /// Active diagnostic trouble codes, in scan order
    pub dtc: Option<Vec<String>>,
}

fn default_ignition() -> bool {
    true
}

/// Decode one line from the bridge into a telemetry frame.
///
/// Returns `None` for empty, truncated or otherwise malformed lines.
pub fn decode_line(line: &str) -> Option<TelemetryFrame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Outbound command to the bridge firmware.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Request a DTC scan; results arrive in a later frame's `dtc` list
    ScanDtc,
    /// Request the firmware clear stored DTCs
    ClearDtc,
    /// Set the charger current limit
    SetCurrent {
        /// Current limit, A
        val: f64,
    },
    /// Enable or disable the charger output
    EnableCharger {
        /// Desired output state
        val: bool,
    },
}

impl Command {
    /// Encode as one newline-terminated JSON record.
    pub fn encode(&self) -> String {
        // Serialization of these variants cannot fail; fall back to an
        // empty line rather than panicking in the send path.
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}
