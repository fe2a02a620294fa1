//! # OpenCockpit Core Library
//!
//! Headless telemetry core for the OpenCockpit in-vehicle display.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Reconnecting serial link to the vehicle bridge
//! - Newline-delimited JSON frame codec and outbound commands
//! - Sparse-merge vehicle state aggregation with change events
//! - Trip computer (distance, averages, economy, range)
//! - Prioritized alert evaluation with dismissal suppression
//! - Ignition-driven delayed shutdown
//! - Git-based OTA update service
//!
//! ## Example
//!
//! ```rust,ignore
//! use cockpit_core::{config::CockpitConfig, telemetry::TelemetryHub};
//!
//! let config = CockpitConfig::load("cockpit.json")?;
//! let mut hub = TelemetryHub::new(&config);
//! let notifications = hub.subscribe();
//!
//! loop {
//!     hub.pump(std::time::Duration::from_millis(50));
//!     while let Ok(event) = notifications.try_recv() {
//!         // drive the display
//!     }
//! }
//! ```

pub mod alerts;
pub mod config;
pub mod demo;
pub mod events;
pub mod frame;
pub mod link;
pub mod power;
pub mod telemetry;
pub mod trip;
pub mod update;
pub mod vehicle;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::alerts::{Alert, AlertCenter, Severity};
    pub use crate::config::CockpitConfig;
    pub use crate::events::{EventBus, Notification};
    pub use crate::frame::{Command, TelemetryFrame};
    pub use crate::link::{LinkConfig, LinkEvent, LinkSession, LinkTransport};
    pub use crate::power::{PowerEvent, PowerMonitor, PowerState};
    pub use crate::telemetry::TelemetryHub;
    pub use crate::trip::{TripComputer, TripState};
    pub use crate::update::{UpdateEvent, UpdatePhase, UpdateService};
    pub use crate::vehicle::{Field, VehicleState};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
