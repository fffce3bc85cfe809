//! Serial port handling
//!
//! Provides OS serial port access through the `serialport` crate.

use serialport::SerialPort;
use std::cmp::Ordering;
use std::collections::BTreeSet;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use super::backend::{PortBackend, PortDescriptor, SerialSettings, ServoLink};

/// Device name prefixes of USB adapters, listed ahead of every other port
const USB_FAMILIES: [&str; 2] = ["ttyACM", "ttyUSB"];

/// Rank a port for display: family position, numeric suffix, then basename
fn display_rank(name: &str) -> (usize, Option<u32>, &str) {
    let base = Path::new(name)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(name);
    USB_FAMILIES
        .iter()
        .enumerate()
        .find_map(|(rank, family)| {
            base.strip_prefix(family)
                .map(|suffix| (rank, suffix.parse().ok(), base))
        })
        .unwrap_or((USB_FAMILIES.len(), None, base))
}

fn compare_ports(a: &PortDescriptor, b: &PortDescriptor) -> Ordering {
    display_rank(&a.name).cmp(&display_rank(&b.name))
}

/// Sort descriptors into the order shown to users
pub fn sort_ports(ports: &mut [PortDescriptor]) {
    ports.sort_by(compare_ports);
}

/// USB serial nodes present under `/dev`, including ones the enumerator
/// has not picked up yet
#[cfg(target_os = "linux")]
fn dev_nodes() -> Vec<String> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| USB_FAMILIES.iter().any(|family| name.starts_with(family)))
        .map(|name| format!("/dev/{}", name))
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn dev_nodes() -> Vec<String> {
    Vec::new()
}

/// Enumerate serial ports, without duplicates, in display order
pub fn list_ports() -> Result<Vec<PortDescriptor>, serialport::Error> {
    let names: BTreeSet<String> = serialport::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .chain(dev_nodes())
        .collect();

    let mut ports: Vec<PortDescriptor> = names.into_iter().map(PortDescriptor::new).collect();
    sort_ports(&mut ports);
    Ok(ports)
}

/// Open a serial port configured 8N1 without flow control
pub fn open_port(name: &str, settings: &SerialSettings) -> Result<Box<dyn SerialPort>, serialport::Error> {
    serialport::new(name, settings.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(settings.timeout)
        .open()
}

/// An open OS serial port
pub struct SerialLink {
    name: String,
    port: Box<dyn SerialPort>,
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl ServoLink for SerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        // Dropping the port releases the descriptor; flushing first surfaces
        // the error for a device that vanished under us.
        let result = self.port.flush();
        drop(self);
        result
    }
}

/// Backend over the real OS serial layer
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl PortBackend for SystemBackend {
    fn enumerate(&self) -> Result<Vec<PortDescriptor>, serialport::Error> {
        list_ports()
    }

    fn open(&mut self, name: &str, settings: &SerialSettings) -> io::Result<Box<dyn ServoLink>> {
        let port = open_port(name, settings).map_err(io::Error::from)?;
        Ok(Box::new(SerialLink {
            name: name.to_string(),
            port,
        }))
    }
}
