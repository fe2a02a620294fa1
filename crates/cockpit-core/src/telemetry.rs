//! Telemetry hub
//!
//! Single owner of all mutable telemetry state. Worker threads (link
//! transport or demo feed, power countdown, update service) report over
//! mpsc channels; the hub drains them from one thread via [`pump`], folds
//! frames into the aggregate vehicle state, ticks the trip computer,
//! evaluates alerts and republishes everything on the [`EventBus`].
//!
//! [`pump`]: TelemetryHub::pump

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alerts::AlertCenter;
use crate::config::CockpitConfig;
use crate::demo::{DemoFeed, DEMO_PERIOD};
use crate::events::{EventBus, Notification};
use crate::frame::{Command, TelemetryFrame};
use crate::link::{LinkConfig, LinkEvent, LinkSession, LinkTransport};
use crate::power::{PlatformPower, PowerEvent, PowerMonitor, PowerState, SystemPower};
use crate::trip::TripComputer;
use crate::update::{UpdateConfig, UpdateEvent, UpdateService};
use crate::vehicle::VehicleState;

/// Central coordinator for the telemetry core.
pub struct TelemetryHub {
    state: VehicleState,
    trip: TripComputer,
    alerts: AlertCenter,
    power: PowerMonitor,
    update: UpdateService,
    bus: Arc<EventBus>,

    transport: Option<LinkTransport>,
    demo: Option<DemoFeed>,
    link_connected: bool,

    link_rx: Receiver<LinkEvent>,
    power_rx: Receiver<PowerEvent>,
    update_rx: Receiver<UpdateEvent>,
}

impl TelemetryHub {
    /// Build and start the full stack from configuration: live serial link
    /// or demo feed, power monitor, and the periodic update scheduler.
    pub fn new(config: &CockpitConfig) -> Self {
        let (link_tx, link_rx) = mpsc::channel();

        let (transport, demo) = if config.demo_mode {
            tracing::info!("demo mode: simulated telemetry");
            (None, Some(DemoFeed::spawn(DEMO_PERIOD, link_tx)))
        } else {
            let mut transport = LinkTransport::new(LinkConfig {
                port_name: config.serial_port.clone(),
                baud_rate: config.serial_baud,
                ..LinkConfig::default()
            });
            transport.start(link_tx);
            (Some(transport), None)
        };

        let mut hub = Self::assemble(config, link_rx, Arc::new(SystemPower), transport, demo);
        hub.update.start();
        hub
    }

    /// Build a hub fed from an external link-event channel, with an
    /// injectable platform. No link transport is spawned and the update
    /// scheduler is not started. Used by tests and embedding hosts.
    pub fn from_link_events(
        config: &CockpitConfig,
        link_rx: Receiver<LinkEvent>,
        platform: Arc<dyn PlatformPower>,
    ) -> Self {
        Self::assemble(config, link_rx, platform, None, None)
    }

    fn assemble(
        config: &CockpitConfig,
        link_rx: Receiver<LinkEvent>,
        platform: Arc<dyn PlatformPower>,
        transport: Option<LinkTransport>,
        demo: Option<DemoFeed>,
    ) -> Self {
        let (power_tx, power_rx) = mpsc::channel();
        let (update_tx, update_rx) = mpsc::channel();

        let install_dir = config
            .install_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| ".".into()));

        Self {
            state: VehicleState::default(),
            trip: TripComputer::new(config.tank_capacity_l, config.demo_mode, Instant::now()),
            alerts: AlertCenter::new(),
            power: PowerMonitor::new(config.shutdown_delay_secs, platform, power_tx),
            update: UpdateService::new(
                UpdateConfig {
                    install_dir,
                    branch: config.update_branch.clone(),
                    ..UpdateConfig::default()
                },
                update_tx,
            ),
            bus: Arc::new(EventBus::new()),
            transport,
            demo,
            link_connected: false,
            link_rx,
            power_rx,
            update_rx,
        }
    }

    /// Subscribe to the notification stream.
    pub fn subscribe(&self) -> Receiver<Notification> {
        self.bus.subscribe()
    }

    /// Drain pending worker events, blocking up to `wait` for the first
    /// link event. Call this in a loop from the owning thread.
    pub fn pump(&mut self, wait: Duration) {
        match self.link_rx.recv_timeout(wait) {
            Ok(event) => self.handle_link_event(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
        while let Ok(event) = self.link_rx.try_recv() {
            self.handle_link_event(event);
        }
        while let Ok(event) = self.power_rx.try_recv() {
            self.bus.publish(Notification::Power(event));
        }
        while let Ok(event) = self.update_rx.try_recv() {
            self.bus.publish(Notification::Update(event));
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => self.set_link_connected(true),
            LinkEvent::Disconnected => self.set_link_connected(false),
            LinkEvent::Frame(frame) => self.handle_frame(&frame),
        }
    }

    /// Repeated disconnects during retry collapse into one notification.
    fn set_link_connected(&mut self, connected: bool) {
        if self.link_connected == connected {
            return;
        }
        self.link_connected = connected;
        self.bus.publish(Notification::LinkConnected(connected));
    }

    fn handle_frame(&mut self, frame: &TelemetryFrame) {
        let now = Instant::now();

        for field in self.state.apply(frame) {
            self.bus.publish(Notification::VehicleField(field));
        }

        let trip = self
            .trip
            .tick(self.state.speed, self.state.fuel_rate, self.state.fuel_level, now)
            .clone();
        self.bus.publish(Notification::Trip(trip));

        if let Some(update) = self.alerts.evaluate(&self.state, now) {
            self.bus.publish(Notification::Alert {
                alert: update.alert,
                visibility_changed: update.visibility_changed,
            });
        }

        self.power.set_ignition(frame.ign);
    }

    /// Current aggregate vehicle state.
    pub fn snapshot(&self) -> VehicleState {
        self.state.clone()
    }

    /// Whether the link is currently up.
    pub fn link_connected(&self) -> bool {
        self.link_connected
    }

    /// Link session details (retries, last error). `None` in demo mode.
    pub fn link_session(&self) -> Option<LinkSession> {
        self.transport.as_ref().map(|t| t.session())
    }

    /// Current power state snapshot.
    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    /// Handle on the update service for phase and check-result queries.
    pub fn update_service(&self) -> &UpdateService {
        &self.update
    }

    /// Request a diagnostic trouble code scan from the bridge.
    pub fn scan_dtc(&self) -> bool {
        self.send(&Command::ScanDtc)
    }

    /// Request the bridge clear stored trouble codes.
    pub fn clear_dtc(&self) -> bool {
        self.send(&Command::ClearDtc)
    }

    /// Set the charger current setpoint in amps.
    pub fn set_charge_current(&self, amps: f64) -> bool {
        self.send(&Command::SetCurrent { val: amps })
    }

    /// Toggle the charger enable, based on the last reported state.
    pub fn toggle_charger(&self) -> bool {
        self.send(&Command::EnableCharger {
            val: !self.state.charger_enabled,
        })
    }

    fn send(&self, cmd: &Command) -> bool {
        match &self.transport {
            Some(transport) => match transport.send(cmd) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("command dropped: {e}");
                    false
                }
            },
            None => {
                tracing::debug!("no live link; command dropped");
                false
            }
        }
    }

    /// Reset trip accumulators and publish the zeroed metrics.
    pub fn reset_trip(&mut self) {
        self.trip.reset(Instant::now());
        let trip = self.trip.state().clone();
        self.bus.publish(Notification::Trip(trip));
    }

    /// Dismiss the visible alert, suppressing re-raise for the dismissal
    /// window.
    pub fn dismiss_alert(&mut self) {
        if let Some(update) = self.alerts.dismiss(Instant::now()) {
            self.bus.publish(Notification::Alert {
                alert: update.alert,
                visibility_changed: update.visibility_changed,
            });
        }
    }

    /// Trigger an update check now.
    pub fn check_for_updates(&self) {
        self.update.check_for_updates();
    }

    /// Apply the available update.
    pub fn apply_update(&self) {
        self.update.apply_update();
    }

    /// Immediate shutdown.
    pub fn shutdown_now(&self) {
        self.power.shutdown_now();
    }

    /// Immediate reboot.
    pub fn reboot(&self) {
        self.power.reboot();
    }

    /// Stop all background workers. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.stop();
        }
        if let Some(mut demo) = self.demo.take() {
            demo.stop();
        }
        self.update.stop();
    }
}

impl Drop for TelemetryHub {
    fn drop(&mut self) {
        self.stop();
    }
}
