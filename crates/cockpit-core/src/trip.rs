//! Trip computer
//!
//! Integrates distance and elapsed time across telemetry ticks and derives
//! average speed, instantaneous fuel economy, and distance to empty.
//!
//! The economy and range figures are deliberately sticky: when their guard
//! conditions fail (stopped, coasting, empty tank reading) the previous
//! value is retained rather than recomputed to zero or infinity.

use std::time::Instant;

use serde::Serialize;

/// Speed below which fuel economy is not recomputed, km/h. Economy figures
/// at walking pace are dominated by idle burn and would read as hundreds of
/// litres per 100 km.
const ECONOMY_MIN_SPEED_KMH: f64 = 5.0;

/// Derived trip metrics, recomputed once per telemetry tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TripState {
    /// Cumulative distance, km
    pub distance_km: f64,
    /// Elapsed time since trip start, seconds
    pub elapsed_secs: f64,
    /// Average speed over the trip, km/h
    pub avg_speed: f64,
    /// Instantaneous fuel economy, L/100km (sticky)
    pub fuel_economy: f64,
    /// Estimated range on remaining fuel, km (sticky)
    pub distance_to_empty: f64,
}

/// Incremental distance/time/economy integrator.
///
/// `tick` must be called once per telemetry tick with the wall-clock `now`;
/// the elapsed delta since the previous tick drives distance integration.
#[derive(Debug)]
pub struct TripComputer {
    state: TripState,
    tank_capacity_l: f64,
    /// Demo feeds integrate distance even at zero speed so the trip page
    /// shows movement; live data only integrates while actually moving.
    demo_mode: bool,
    started_at: Instant,
    last_tick: Instant,
}

impl TripComputer {
    /// Create a trip computer anchored at `now`.
    pub fn new(tank_capacity_l: f64, demo_mode: bool, now: Instant) -> Self {
        Self {
            state: TripState::default(),
            tank_capacity_l,
            demo_mode,
            started_at: now,
            last_tick: now,
        }
    }

    /// Current trip metrics.
    pub fn state(&self) -> &TripState {
        &self.state
    }

    /// Advance the trip by one telemetry tick.
    ///
    /// `speed` in km/h, `fuel_rate` in L/h, `fuel_level` in percent.
    pub fn tick(&mut self, speed: f64, fuel_rate: f64, fuel_level: f64, now: Instant) -> &TripState {
        let dt = now.saturating_duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;

        if speed > 0.0 || self.demo_mode {
            self.state.distance_km += (speed / 3600.0) * dt;
        }

        let elapsed = now.saturating_duration_since(self.started_at);
        self.state.elapsed_secs = elapsed.as_secs_f64();
        if self.state.elapsed_secs > 0.0 {
            self.state.avg_speed = self.state.distance_km / (self.state.elapsed_secs / 3600.0);
        }

        if speed > ECONOMY_MIN_SPEED_KMH && fuel_rate > 0.0 {
            self.state.fuel_economy = (fuel_rate / speed) * 100.0;
        }

        if self.state.fuel_economy > 0.0 && fuel_level > 0.0 {
            let fuel_remaining_l = (fuel_level / 100.0) * self.tank_capacity_l;
            self.state.distance_to_empty = fuel_remaining_l / (self.state.fuel_economy / 100.0);
        }

        &self.state
    }

    /// Reset the trip: zero distance, elapsed time and average speed, and
    /// re-anchor the start timestamp. Economy and range are left as-is so
    /// the range estimate survives a trip reset.
    pub fn reset(&mut self, now: Instant) {
        self.state.distance_km = 0.0;
        self.state.elapsed_secs = 0.0;
        self.state.avg_speed = 0.0;
        self.started_at = now;
        self.last_tick = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn computer() -> (TripComputer, Instant) {
        let t0 = Instant::now();
        (TripComputer::new(50.0, false, t0), t0)
    }

    #[test]
    fn integrates_distance_from_speed() {
        let (mut trip, t0) = computer();

        // 60 km/h for 60 one-second ticks = 1 km.
        for i in 1..=60u64 {
            trip.tick(60.0, 5.0, 80.0, t0 + Duration::from_secs(i));
        }
        let s = trip.state();
        assert!((s.distance_km - 1.0).abs() < 1e-9, "distance {}", s.distance_km);
        assert_eq!(s.elapsed_secs, 60.0);
        assert!((s.avg_speed - 60.0).abs() < 1e-9, "avg {}", s.avg_speed);
    }

    #[test]
    fn no_distance_while_stationary_in_live_mode() {
        let (mut trip, t0) = computer();
        trip.tick(0.0, 0.8, 80.0, t0 + Duration::from_secs(10));
        assert_eq!(trip.state().distance_km, 0.0);
    }

    #[test]
    fn demo_mode_integrates_unconditionally() {
        let t0 = Instant::now();
        let mut trip = TripComputer::new(50.0, true, t0);
        trip.tick(0.0, 0.0, 80.0, t0 + Duration::from_secs(10));
        // Zero speed contributes zero distance either way, but the branch
        // must not panic or skip the tick bookkeeping.
        assert_eq!(trip.state().elapsed_secs, 10.0);
    }

    #[test]
    fn fuel_economy_sticky_below_speed_threshold() {
        let (mut trip, t0) = computer();

        trip.tick(50.0, 5.0, 80.0, t0 + Duration::from_secs(1));
        let economy = trip.state().fuel_economy;
        assert!((economy - 10.0).abs() < 1e-9, "economy {}", economy);

        // Below the 5 km/h threshold the figure must not recompute.
        trip.tick(3.0, 5.0, 80.0, t0 + Duration::from_secs(2));
        assert_eq!(trip.state().fuel_economy, economy);

        // Zero fuel rate is equally sticky.
        trip.tick(50.0, 0.0, 80.0, t0 + Duration::from_secs(3));
        assert_eq!(trip.state().fuel_economy, economy);
    }

    #[test]
    fn distance_to_empty_from_economy_and_level() {
        let (mut trip, t0) = computer();

        // 10 L/100km economy, 80% of 50 L tank = 40 L -> 400 km range.
        trip.tick(50.0, 5.0, 80.0, t0 + Duration::from_secs(1));
        let dte = trip.state().distance_to_empty;
        assert!((dte - 400.0).abs() < 1e-6, "dte {}", dte);

        // With no fuel level reading the estimate is sticky.
        trip.tick(50.0, 5.0, 0.0, t0 + Duration::from_secs(2));
        assert_eq!(trip.state().distance_to_empty, dte);
    }

    #[test]
    fn avg_speed_guards_zero_elapsed() {
        let (mut trip, t0) = computer();
        // Tick at the anchor instant: elapsed == 0, must not divide.
        trip.tick(50.0, 5.0, 80.0, t0);
        assert_eq!(trip.state().avg_speed, 0.0);
    }

    #[test]
    fn reset_zeroes_and_reanchors() {
        let (mut trip, t0) = computer();
        for i in 1..=3600u64 {
            trip.tick(120.0, 9.0, 60.0, t0 + Duration::from_secs(i));
        }
        assert!(trip.state().distance_km > 100.0);

        let t_reset = t0 + Duration::from_secs(3600);
        trip.reset(t_reset);
        assert_eq!(trip.state().distance_km, 0.0);
        assert_eq!(trip.state().elapsed_secs, 0.0);
        assert_eq!(trip.state().avg_speed, 0.0);

        // Next tick measures from the new anchor, not the old one.
        trip.tick(60.0, 5.0, 60.0, t_reset + Duration::from_secs(1));
        assert_eq!(trip.state().elapsed_secs, 1.0);
    }
}
