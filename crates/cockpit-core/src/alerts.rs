//! Safety alert evaluation
//!
//! A fixed, priority-ordered rule set evaluated against the vehicle snapshot
//! on every telemetry tick, plus a stateful suppression layer: dismissing an
//! alert hides the whole evaluator for 30 seconds without clearing the
//! underlying condition.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::vehicle::VehicleState;

/// How long a dismissed alert stays hidden.
pub const DISMISS_SUPPRESSION: Duration = Duration::from_secs(30);

/// Alert severity. The ordering is total: `Critical > Warning > None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No alert
    None,
    /// Advisory condition
    Warning,
    /// Condition requiring immediate attention
    Critical,
}

/// One visible alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Human-readable alert text
    pub text: String,
    /// Alert severity
    pub severity: Severity,
}

/// Outcome of one evaluation pass, reported only when something changed.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertUpdate {
    /// The alert now visible, or `None` when cleared
    pub alert: Option<Alert>,
    /// Whether "is any alert visible" flipped on this pass
    pub visibility_changed: bool,
}

/// Evaluate the rule set against a snapshot, in fixed priority order.
///
/// Returns every matching candidate; resolution picks the first critical
/// match, else the first warning match.
fn candidates(v: &VehicleState) -> Vec<Alert> {
    let mut out = Vec::new();
    let mut push = |text: String, severity: Severity| out.push(Alert { text, severity });

    if v.coolant > 110.0 {
        push(format!("ENGINE OVERHEAT — coolant {:.0}°C", v.coolant), Severity::Critical);
    } else if v.coolant > 100.0 {
        push(format!("Coolant temperature high ({:.0}°C)", v.coolant), Severity::Warning);
    }

    // A zero level means the sender has not reported yet; don't alarm on it.
    if v.fuel_level > 0.0 {
        if v.fuel_level < 10.0 {
            push(format!("FUEL CRITICAL — {:.0}% remaining", v.fuel_level), Severity::Critical);
        } else if v.fuel_level < 20.0 {
            push(format!("Fuel low ({:.0}%)", v.fuel_level), Severity::Warning);
        }
    }

    if v.batt_v > 0.0 && v.batt_v < 11.5 {
        push(format!("BATTERY LOW — {:.1}V", v.batt_v), Severity::Critical);
    }

    if v.oil_temp > 130.0 {
        push(format!("OIL TEMPERATURE — {:.0}°C", v.oil_temp), Severity::Critical);
    }

    if let Some(code) = v.dtc_codes.iter().find(|c| c.starts_with("P03")) {
        push(format!("ENGINE MISFIRE — {}", code), Severity::Critical);
    }

    if v.speed > 160.0 {
        push(format!("Speed {:.0} km/h", v.speed), Severity::Warning);
    }

    out
}

/// Pick the visible alert from the candidate list: first critical in rule
/// order, else first warning, else nothing.
fn resolve(candidates: &[Alert]) -> Option<Alert> {
    candidates
        .iter()
        .find(|a| a.severity == Severity::Critical)
        .or_else(|| candidates.iter().find(|a| a.severity == Severity::Warning))
        .cloned()
}

/// Stateful alert layer: current visible alert plus suppression deadline.
#[derive(Debug, Default)]
pub struct AlertCenter {
    current: Option<Alert>,
    suppressed_until: Option<Instant>,
}

impl AlertCenter {
    /// Create an alert center with no active alert and no suppression.
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently visible alert.
    pub fn current(&self) -> Option<&Alert> {
        self.current.as_ref()
    }

    /// Whether evaluation is currently suppressed.
    pub fn suppressed(&self, now: Instant) -> bool {
        matches!(self.suppressed_until, Some(deadline) if now < deadline)
    }

    /// Evaluate the rule set against `state`.
    ///
    /// Returns `None` when nothing changed (or evaluation is suppressed);
    /// otherwise the new visible alert and whether the visibility edge
    /// flipped.
    pub fn evaluate(&mut self, state: &VehicleState, now: Instant) -> Option<AlertUpdate> {
        if self.suppressed(now) {
            return None;
        }

        let next = resolve(&candidates(state));
        if next == self.current {
            return None;
        }

        let visibility_changed = next.is_some() != self.current.is_some();
        self.current = next.clone();
        if let Some(alert) = &self.current {
            tracing::info!(severity = ?alert.severity, text = %alert.text, "alert raised");
        } else {
            tracing::info!("alert cleared");
        }

        Some(AlertUpdate {
            alert: next,
            visibility_changed,
        })
    }

    /// Dismiss the visible alert and suppress evaluation for 30 seconds.
    ///
    /// The underlying condition is not cleared, only hidden; once the
    /// deadline passes the next evaluation re-raises whatever still holds.
    pub fn dismiss(&mut self, now: Instant) -> Option<AlertUpdate> {
        self.suppressed_until = Some(now + DISMISS_SUPPRESSION);
        if self.current.take().is_some() {
            tracing::debug!("alert dismissed; suppressing for {:?}", DISMISS_SUPPRESSION);
            Some(AlertUpdate {
                alert: None,
                visibility_changed: true,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base_state() -> VehicleState {
        VehicleState {
            fuel_level: 80.0,
            batt_v: 27.0,
            ..VehicleState::default()
        }
    }

    #[test]
    fn coolant_critical_outranks_fuel_critical() {
        let mut center = AlertCenter::new();
        let mut state = base_state();
        state.coolant = 115.0;
        state.fuel_level = 5.0;
        state.speed = 50.0;

        let update = center.evaluate(&state, Instant::now()).expect("alert expected");
        let alert = update.alert.expect("visible alert expected");
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.text.contains("OVERHEAT"), "got {}", alert.text);
        assert!(update.visibility_changed);
    }

    #[test]
    fn first_warning_wins_without_criticals() {
        let mut center = AlertCenter::new();
        let mut state = base_state();
        state.coolant = 105.0;
        state.speed = 170.0;

        let alert = center
            .evaluate(&state, Instant::now())
            .and_then(|u| u.alert)
            .expect("visible alert expected");
        assert_eq!(alert.severity, Severity::Warning);
        assert!(alert.text.contains("Coolant"), "got {}", alert.text);
    }

    #[test]
    fn misfire_dtc_is_critical() {
        let mut center = AlertCenter::new();
        let mut state = base_state();
        state.dtc_codes = vec!["P0420".to_string(), "P0301".to_string()];

        let alert = center
            .evaluate(&state, Instant::now())
            .and_then(|u| u.alert)
            .expect("visible alert expected");
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.text.contains("P0301"), "got {}", alert.text);
    }

    #[test]
    fn battery_rule_ignores_zero_reading() {
        let mut center = AlertCenter::new();
        let mut state = base_state();
        state.batt_v = 0.0;
        assert!(center.evaluate(&state, Instant::now()).is_none());

        state.batt_v = 11.0;
        let alert = center
            .evaluate(&state, Instant::now())
            .and_then(|u| u.alert)
            .expect("visible alert expected");
        assert!(alert.text.contains("BATTERY"), "got {}", alert.text);
    }

    #[test]
    fn visibility_edge_fires_only_on_transitions() {
        let mut center = AlertCenter::new();
        let mut state = base_state();
        let t = Instant::now();

        state.coolant = 115.0;
        let up = center.evaluate(&state, t).expect("raise expected");
        assert!(up.visibility_changed);

        // Same condition, no change, no notification.
        assert!(center.evaluate(&state, t).is_none());

        // Condition worsens: alert text changes but visibility does not.
        state.coolant = 120.0;
        let up = center.evaluate(&state, t).expect("update expected");
        assert!(!up.visibility_changed);
        assert!(up.alert.is_some());

        // Condition clears: visibility flips off.
        state.coolant = 90.0;
        let up = center.evaluate(&state, t).expect("clear expected");
        assert!(up.visibility_changed);
        assert_eq!(up.alert, None);
    }

    #[test]
    fn dismiss_suppresses_even_new_criticals_until_deadline() {
        let mut center = AlertCenter::new();
        let mut state = base_state();
        let t0 = Instant::now();

        state.coolant = 115.0;
        center.evaluate(&state, t0).expect("raise expected");

        let up = center.dismiss(t0).expect("dismiss hides the alert");
        assert!(up.visibility_changed);
        assert_eq!(center.current(), None);

        // A brand-new critical condition inside the window stays hidden.
        state.oil_temp = 140.0;
        assert!(center.evaluate(&state, t0 + Duration::from_secs(10)).is_none());
        assert!(center.evaluate(&state, t0 + Duration::from_secs(29)).is_none());

        // Once the deadline passes, the persisting condition re-raises.
        let up = center
            .evaluate(&state, t0 + Duration::from_secs(30))
            .expect("alert should return after suppression");
        assert!(up.alert.is_some());
        assert!(up.visibility_changed);
    }

    #[test]
    fn dismiss_with_no_alert_still_arms_suppression() {
        let mut center = AlertCenter::new();
        let t0 = Instant::now();
        assert!(center.dismiss(t0).is_none());

        let mut state = base_state();
        state.coolant = 115.0;
        assert!(center.evaluate(&state, t0 + Duration::from_secs(1)).is_none());
    }
}
