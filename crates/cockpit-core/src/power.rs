//! Power and ignition monitoring
//!
//! Reacts to the ignition-sense signal from the telemetry stream. When the
//! key goes off a cancellable countdown starts on its own thread; if it runs
//! to zero the platform is shut down cleanly. Any ignition-on transition
//! cancels the countdown outright (it is never paused).

use std::process::Command as ProcessCommand;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default key-off grace period before shutdown, seconds.
pub const DEFAULT_SHUTDOWN_DELAY_SECS: u32 = 30;

/// Events emitted by the power monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerEvent {
    /// Ignition sense changed
    IgnitionChanged(bool),
    /// Shutdown countdown tick; payload is seconds remaining
    ShutdownWarning(u32),
    /// A pending shutdown was cancelled by ignition-on
    ShutdownCancelled,
}

/// Snapshot of the power state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerState {
    /// Current ignition sense
    pub ignition_on: bool,
    /// Whether a shutdown countdown is running
    pub shutdown_pending: bool,
    /// Seconds remaining on the countdown (0 when none is running)
    pub remaining_secs: u32,
}

/// Platform shutdown/reboot primitive, injectable for tests.
pub trait PlatformPower: Send + Sync {
    /// Halt the system. Best-effort; failure is logged, never retried.
    fn shutdown(&self);
    /// Reboot the system. Best-effort.
    fn reboot(&self);
}

/// Real platform control via the host's shutdown/reboot commands.
#[derive(Debug, Default)]
pub struct SystemPower;

impl PlatformPower for SystemPower {
    fn shutdown(&self) {
        if let Err(e) = ProcessCommand::new("sudo").args(["shutdown", "-h", "now"]).status() {
            tracing::warn!("shutdown command failed: {e}");
        }
    }

    fn reboot(&self) {
        if let Err(e) = ProcessCommand::new("sudo").arg("reboot").status() {
            tracing::warn!("reboot command failed: {e}");
        }
    }
}

/// Ignition state machine driving the delayed-shutdown countdown.
pub struct PowerMonitor {
    ignition_on: bool,
    shutdown_delay_secs: u32,
    tick_interval: Duration,
    pending: Arc<AtomicBool>,
    remaining: Arc<AtomicU32>,
    /// Bumped on every countdown start so a stale countdown thread from a
    /// fast off-on-off key cycle can never fire or clobber its successor.
    generation: Arc<AtomicU64>,
    platform: Arc<dyn PlatformPower>,
    events: Sender<PowerEvent>,
}

impl PowerMonitor {
    /// Create a monitor. Ignition starts on (the box only boots with power).
    pub fn new(
        shutdown_delay_secs: u32,
        platform: Arc<dyn PlatformPower>,
        events: Sender<PowerEvent>,
    ) -> Self {
        Self {
            ignition_on: true,
            shutdown_delay_secs,
            tick_interval: Duration::from_secs(1),
            pending: Arc::new(AtomicBool::new(false)),
            remaining: Arc::new(AtomicU32::new(0)),
            generation: Arc::new(AtomicU64::new(0)),
            platform,
            events,
        }
    }

    /// Override the countdown tick interval. Production ticks once per
    /// second; tests shorten this so countdowns complete quickly.
    pub fn set_tick_interval(&mut self, interval: Duration) {
        self.tick_interval = interval;
    }

    /// Current state snapshot.
    pub fn state(&self) -> PowerState {
        PowerState {
            ignition_on: self.ignition_on,
            shutdown_pending: self.pending.load(Ordering::SeqCst),
            remaining_secs: self.remaining.load(Ordering::SeqCst),
        }
    }

    /// Feed an ignition-sense reading from the telemetry stream.
    ///
    /// Off starts the countdown; on cancels any pending countdown. Repeats
    /// of the current state are ignored.
    pub fn set_ignition(&mut self, on: bool) {
        if on == self.ignition_on {
            return;
        }
        self.ignition_on = on;
        tracing::info!(ignition = on, "ignition state changed");
        let _ = self.events.send(PowerEvent::IgnitionChanged(on));

        if on {
            self.cancel_countdown();
        } else {
            self.start_countdown();
        }
    }

    /// Immediate shutdown, bypassing the state machine.
    pub fn shutdown_now(&self) {
        tracing::warn!("immediate shutdown requested");
        self.platform.shutdown();
    }

    /// Immediate reboot, bypassing the state machine.
    pub fn reboot(&self) {
        tracing::warn!("reboot requested");
        self.platform.reboot();
    }

    fn start_countdown(&mut self) {
        let my_gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.store(true, Ordering::SeqCst);
        self.remaining.store(self.shutdown_delay_secs, Ordering::SeqCst);

        let pending = Arc::clone(&self.pending);
        let remaining = Arc::clone(&self.remaining);
        let generation = Arc::clone(&self.generation);
        let platform = Arc::clone(&self.platform);
        let events = self.events.clone();
        let delay = self.shutdown_delay_secs;
        let tick = self.tick_interval;

        thread::spawn(move || {
            for secs in (1..=delay).rev() {
                // Cancellation and supersession are only observed here, at
                // the top of the tick: worst-case latency is one interval.
                if generation.load(Ordering::SeqCst) != my_gen {
                    return;
                }
                if !pending.load(Ordering::SeqCst) {
                    remaining.store(0, Ordering::SeqCst);
                    return;
                }
                remaining.store(secs, Ordering::SeqCst);
                let _ = events.send(PowerEvent::ShutdownWarning(secs));
                thread::sleep(tick);
            }

            if generation.load(Ordering::SeqCst) == my_gen && pending.load(Ordering::SeqCst) {
                tracing::warn!("key-off countdown elapsed, shutting down");
                remaining.store(0, Ordering::SeqCst);
                platform.shutdown();
            }
        });
    }

    fn cancel_countdown(&mut self) {
        if self.pending.swap(false, Ordering::SeqCst) {
            self.remaining.store(0, Ordering::SeqCst);
            tracing::info!("shutdown countdown cancelled");
            let _ = self.events.send(PowerEvent::ShutdownCancelled);
        }
    }
}
