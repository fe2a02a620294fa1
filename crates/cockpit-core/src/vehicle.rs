//! Vehicle state aggregation
//!
//! Holds the single authoritative snapshot of vehicle telemetry and applies
//! inbound frames as sparse merges: only keys present in a frame overwrite
//! the prior value, and a change is reported per field that actually moved.

use serde::Serialize;

use crate::frame::TelemetryFrame;

/// Identifies one field of [`VehicleState`] for per-field change
/// notifications. The UI subscribes per field, not per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Vehicle speed
    Speed,
    /// Engine RPM
    Rpm,
    /// Coolant temperature
    Coolant,
    /// Throttle position
    Throttle,
    /// Engine load
    Load,
    /// Charger pack voltage
    BattVoltage,
    /// Charger pack current
    BattCurrent,
    /// Commanded charge rate
    ChargeRate,
    /// Charger temperature probe 1
    TempT1,
    /// Charger temperature probe 2
    TempT2,
    /// Ambient temperature
    TempAmbient,
    /// Charger output enabled
    ChargerEnabled,
    /// Fuel consumption rate
    FuelRate,
    /// Fuel tank level
    FuelLevel,
    /// Mass air flow
    Maf,
    /// Intake air temperature
    IntakeTemp,
    /// Oil temperature
    OilTemp,
    /// Ignition timing advance
    TimingAdvance,
    /// Oxygen sensor voltage
    O2Voltage,
    /// Fuel rail pressure
    FuelPressure,
    /// CAN bus health
    CanOk,
    /// RS-485 bus health
    Rs485Ok,
    /// Active trouble code list
    DtcCodes,
}

/// The aggregate vehicle snapshot.
///
/// Invariant: every field holds the last successfully parsed value for its
/// key. A key absent from a frame leaves its field unchanged, except the
/// two link-health flags, which are authoritative in every frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VehicleState {
    /// Vehicle speed, km/h
    pub speed: f64,
    /// Engine speed, RPM
    pub rpm: f64,
    /// Coolant temperature, °C
    pub coolant: f64,
    /// Throttle position, %
    pub throttle: f64,
    /// Calculated engine load, %
    pub load: f64,

    /// Charger pack voltage, V
    pub batt_v: f64,
    /// Charger pack current, A
    pub batt_i: f64,
    /// Commanded charge rate, A
    pub charge_rate: f64,
    /// Charger temperature probe 1, °C
    pub temp_t1: f64,
    /// Charger temperature probe 2, °C
    pub temp_t2: f64,
    /// Ambient temperature, °C
    pub temp_amb: f64,
    /// Charger output enabled
    pub charger_enabled: bool,

    /// Fuel consumption rate, L/h
    pub fuel_rate: f64,
    /// Fuel tank level, %
    pub fuel_level: f64,
    /// Mass air flow, g/s
    pub maf: f64,
    /// Intake air temperature, °C
    pub intake_temp: f64,
    /// Engine oil temperature, °C
    pub oil_temp: f64,
    /// Ignition timing advance, ° BTDC
    pub timing_advance: f64,
    /// Oxygen sensor voltage, V
    pub o2_voltage: f64,
    /// Fuel rail pressure, kPa
    pub fuel_pressure: f64,

    /// CAN bus healthy in the last frame
    pub can_ok: bool,
    /// RS-485 bus healthy in the last frame
    pub rs485_ok: bool,

    /// Active diagnostic trouble codes, in scan order
    pub dtc_codes: Vec<String>,
}

impl VehicleState {
    /// Merge one decoded frame into the snapshot.
    ///
    /// Returns the fields whose stored value actually changed, in a fixed
    /// order. Notifications are debounced on value equality for every field
    /// uniformly, including the charger-enable flag.
    pub fn apply(&mut self, frame: &TelemetryFrame) -> Vec<Field> {
        let mut changed = Vec::new();

        merge(&mut self.speed, frame.obd.spd, Field::Speed, &mut changed);
        merge(&mut self.rpm, frame.obd.rpm, Field::Rpm, &mut changed);
        merge(&mut self.coolant, frame.obd.ect, Field::Coolant, &mut changed);
        merge(&mut self.throttle, frame.obd.thr, Field::Throttle, &mut changed);
        merge(&mut self.load, frame.obd.load, Field::Load, &mut changed);

        merge(&mut self.batt_v, frame.chg.v, Field::BattVoltage, &mut changed);
        merge(&mut self.batt_i, frame.chg.a, Field::BattCurrent, &mut changed);
        merge(&mut self.charge_rate, frame.chg.rate, Field::ChargeRate, &mut changed);
        merge(&mut self.temp_t1, frame.chg.t1, Field::TempT1, &mut changed);
        merge(&mut self.temp_t2, frame.chg.t2, Field::TempT2, &mut changed);
        merge(&mut self.temp_amb, frame.chg.amb, Field::TempAmbient, &mut changed);
        if let Some(en) = frame.chg.en {
            if self.charger_enabled != en {
                self.charger_enabled = en;
                changed.push(Field::ChargerEnabled);
            }
        }

        merge(&mut self.fuel_rate, frame.obd.fuel_rate, Field::FuelRate, &mut changed);
        merge(&mut self.fuel_level, frame.obd.fuel_lvl, Field::FuelLevel, &mut changed);
        merge(&mut self.maf, frame.obd.maf, Field::Maf, &mut changed);
        merge(&mut self.intake_temp, frame.obd.iat, Field::IntakeTemp, &mut changed);
        merge(&mut self.oil_temp, frame.obd.oil_t, Field::OilTemp, &mut changed);
        merge(&mut self.timing_advance, frame.obd.timing, Field::TimingAdvance, &mut changed);
        merge(&mut self.o2_voltage, frame.obd.o2v, Field::O2Voltage, &mut changed);
        merge(&mut self.fuel_pressure, frame.obd.fuel_p, Field::FuelPressure, &mut changed);

        // Link-health flags are overwritten on every frame; a frame that
        // omits them is reporting the bus as down.
        if self.can_ok != frame.can {
            self.can_ok = frame.can;
            changed.push(Field::CanOk);
        }
        if self.rs485_ok != frame.rs485 {
            self.rs485_ok = frame.rs485;
            changed.push(Field::Rs485Ok);
        }

        if let Some(codes) = &frame.dtc {
            if &self.dtc_codes != codes {
                self.dtc_codes = codes.clone();
                changed.push(Field::DtcCodes);
            }
        }

        changed
    }
}

fn merge(target: &mut f64, incoming: Option<f64>, field: Field, changed: &mut Vec<Field>) {
    if let Some(value) = incoming {
        if *target != value {
            *target = value;
            changed.push(field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::decode_line;
    use pretty_assertions::assert_eq;

    fn frame(json: &str) -> TelemetryFrame {
        decode_line(json).expect("test frame should decode")
    }

    #[test]
    fn sparse_merge_preserves_absent_keys() {
        let mut state = VehicleState::default();
        state.apply(&frame(
            r#"{"obd":{"spd":50,"rpm":2000,"ect":85},"chg":{"v":26.0},"can":true,"rs485":true}"#,
        ));

        // Second frame carries only speed; everything else must survive.
        let changed = state.apply(&frame(r#"{"obd":{"spd":55},"can":true,"rs485":true}"#));

        assert_eq!(changed, vec![Field::Speed]);
        assert_eq!(state.speed, 55.0);
        assert_eq!(state.rpm, 2000.0);
        assert_eq!(state.coolant, 85.0);
        assert_eq!(state.batt_v, 26.0);
    }

    #[test]
    fn every_present_key_overwrites() {
        let mut state = VehicleState::default();
        let changed = state.apply(&frame(
            r#"{"obd":{"spd":10,"rpm":900,"ect":70,"thr":5,"load":20,"fuel_rate":1.2,"fuel_lvl":80,"maf":4.1,"iat":25,"oil_t":75,"timing":12,"o2v":0.45,"fuel_p":350},"chg":{"v":27.1,"a":8.0,"rate":16.0,"t1":30,"t2":31,"amb":22,"en":true},"can":true,"rs485":true,"dtc":["P0420"]}"#,
        ));

        assert_eq!(changed.len(), 23);
        assert_eq!(state.fuel_pressure, 350.0);
        assert_eq!(state.o2_voltage, 0.45);
        assert!(state.charger_enabled);
        assert_eq!(state.dtc_codes, vec!["P0420".to_string()]);
    }

    #[test]
    fn link_flags_reset_when_absent() {
        let mut state = VehicleState::default();
        state.apply(&frame(r#"{"can":true,"rs485":true}"#));
        assert!(state.can_ok);
        assert!(state.rs485_ok);

        let changed = state.apply(&frame(r#"{"obd":{"spd":30}}"#));
        assert!(!state.can_ok);
        assert!(!state.rs485_ok);
        assert!(changed.contains(&Field::CanOk));
        assert!(changed.contains(&Field::Rs485Ok));
    }

    #[test]
    fn unchanged_values_do_not_notify() {
        let mut state = VehicleState::default();
        state.apply(&frame(r#"{"obd":{"spd":42},"chg":{"en":true},"can":true,"rs485":true}"#));

        let changed =
            state.apply(&frame(r#"{"obd":{"spd":42},"chg":{"en":true},"can":true,"rs485":true}"#));
        assert_eq!(changed, Vec::<Field>::new());
    }

    #[test]
    fn dtc_list_only_changes_via_frames() {
        let mut state = VehicleState::default();
        state.apply(&frame(r#"{"dtc":["P0301","P0302"],"can":true,"rs485":true}"#));
        assert_eq!(state.dtc_codes.len(), 2);

        // Frame without a dtc key leaves the list alone.
        state.apply(&frame(r#"{"obd":{"spd":10},"can":true,"rs485":true}"#));
        assert_eq!(state.dtc_codes.len(), 2);

        // A reported empty list clears it.
        let changed = state.apply(&frame(r#"{"dtc":[],"can":true,"rs485":true}"#));
        assert!(changed.contains(&Field::DtcCodes));
        assert!(state.dtc_codes.is_empty());
    }
}
