//! Serial port handling
//!
//! Low-level port access for the bridge link.

use std::time::Duration;

use serialport::SerialPort;

use super::{LinkError, DEFAULT_BAUD_RATE, READ_TIMEOUT_MS};

/// Sort key so ttyACM* ports come first (numerically), then ttyUSB*, then
/// everything else by name. The bridge usually enumerates as ttyUSB0 but
/// dev setups see ACM adapters too.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial port names in deterministic order.
pub fn list_ports() -> Vec<String> {
    let mut names: Vec<String> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|info| info.port_name)
        .collect();
    names.sort_by_key(|n| port_sort_key(n));
    names.dedup();
    names
}

/// Open and configure a port for the bridge link: 8N1, no flow control,
/// short read timeout, DTR asserted so opening the port does not reset the
/// bridge microcontroller.
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, LinkError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    let mut port = serialport::new(name, baud)
        .timeout(Duration::from_millis(READ_TIMEOUT_MS))
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(|e| LinkError::Serial(e.to_string()))?;

    // Keep DTR high: toggling it on open triggers a bootloader reset on
    // Arduino-style bridges.
    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!("failed to assert DTR on {name}: {e} (continuing)");
    }

    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_ports_does_not_panic() {
        let ports = list_ports();
        for port in &ports {
            println!("found port: {port}");
        }
    }

    #[test]
    fn acm_ports_sort_before_usb_ports() {
        let mut names = vec![
            "/dev/ttyUSB1".to_string(),
            "/dev/ttyACM10".to_string(),
            "/dev/ttyUSB0".to_string(),
            "/dev/rfcomm0".to_string(),
            "/dev/ttyACM2".to_string(),
        ];
        names.sort_by_key(|n| port_sort_key(n));
        assert_eq!(
            names,
            vec![
                "/dev/ttyACM2",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/rfcomm0",
            ]
        );
    }
}
