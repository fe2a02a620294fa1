//! Demo mode - simulated vehicle data generator
//!
//! Produces plausible telemetry frames without hardware attached, feeding
//! the same channel the live link transport would. Cruise speed, engine
//! parameters and charger readings follow slow sine curves with a little
//! random jitter so gauges visibly move.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::{ChargerReadings, ObdReadings, TelemetryFrame};
use crate::link::LinkEvent;

/// Default period between simulated frames.
pub const DEMO_PERIOD: Duration = Duration::from_millis(500);

/// Background generator of simulated telemetry frames.
pub struct DemoFeed {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DemoFeed {
    /// Spawn the generator thread. Emits one `Connected` event and then a
    /// frame every `period` until stopped.
    pub fn spawn(period: Duration, events: Sender<LinkEvent>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let worker = thread::spawn(move || {
            let mut rng = StdRng::from_entropy();
            let mut tick: u64 = 0;
            let _ = events.send(LinkEvent::Connected);

            while flag.load(Ordering::SeqCst) {
                let frame = simulate(tick, &mut rng);
                if events.send(LinkEvent::Frame(frame)).is_err() {
                    break;
                }
                tick += 1;
                thread::sleep(period);
            }
        });

        Self {
            running,
            worker: Some(worker),
        }
    }

    /// Stop the generator and join its thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DemoFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One simulated frame. `tick` advances the sine phases; `rng` adds jitter.
fn simulate(tick: u64, rng: &mut StdRng) -> TelemetryFrame {
    let t = tick as f64 * 0.5;

    let speed = (60.0 + 40.0 * (t * 0.3).sin() + rng.gen_range(-1.0..1.0)).max(0.0);
    let rpm = (2000.0 + 1500.0 * (t * 0.5).sin() + rng.gen_range(-30.0..30.0)).max(700.0);

    TelemetryFrame {
        obd: ObdReadings {
            spd: Some(speed),
            rpm: Some(rpm),
            ect: Some(80.0 + 10.0 * (t * 0.1).sin()),
            thr: Some((30.0 + 30.0 * (t * 0.7).sin()).clamp(0.0, 100.0)),
            load: Some((40.0 + 20.0 * (t * 0.4).sin()).clamp(0.0, 100.0)),
            fuel_rate: Some((2.0 + speed / 20.0).max(0.5)),
            fuel_lvl: Some((80.0 - t * 0.01).max(5.0)),
            maf: Some(3.0 + rpm / 1000.0),
            iat: Some(25.0 + 3.0 * (t * 0.05).sin()),
            oil_t: Some(90.0 + 8.0 * (t * 0.08).sin()),
            timing: Some(10.0 + rpm / 400.0),
            o2v: Some(0.45 + 0.05 * (t * 1.5).sin()),
            fuel_p: Some(350.0 + 20.0 * (t * 0.2).sin()),
        },
        chg: ChargerReadings {
            v: Some(27.0 + 1.5 * (t * 0.2).sin()),
            a: Some(25.0 + 5.0 * (t * 0.3).sin()),
            rate: Some(30.0),
            t1: Some(38.0 + 5.0 * (t * 0.15).sin()),
            t2: Some(35.0 + 4.0 * (t * 0.12).sin()),
            amb: Some(32.0),
            en: Some(true),
        },
        can: true,
        rs485: true,
        ign: true,
        dtc: None,
    }
}
