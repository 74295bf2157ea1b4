//! Port abstraction for serial communication.
//!
//! This module separates I/O from protocol logic so the bootloader session
//! can be driven against real hardware or against a scripted fake in tests:
//!
//! - [`Port`] is one open serial connection.
//! - [`Host`] is the machine the ports live on: it enumerates ports, opens
//!   them, and sleeps. The reset handshake re-enumerates ports in a polling
//!   loop, so enumeration and time both have to go through the same seam.
//!
//! ## Example
//!
//! ```rust,no_run
//! use arduflash::port::{Host, native::NativeHost};
//!
//! fn example() -> arduflash::Result<()> {
//!     let mut host = NativeHost::default();
//!     for port in host.list_ports()? {
//!         println!("{}", port.name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 57600,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// A bare port with just a name, no USB metadata.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

/// One open serial connection.
///
/// Reading and writing go through the `Read`/`Write` supertraits; the only
/// extra capability the protocol needs is an explicit close, for the
/// open-and-drop 1200-baud touch.
pub trait Port: Read + Write + Send {
    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// The environment ports live in: enumeration, opening, and time.
///
/// The Caterina reset handshake touches a port at 1200 baud, waits for it to
/// drop off the bus, then polls enumeration until it reappears. Routing all
/// three capabilities through one trait lets tests script the whole dance
/// without hardware or real delays.
pub trait Host {
    /// The port type this host opens.
    type Port: Port;

    /// List all available serial ports.
    fn list_ports(&mut self) -> Result<Vec<PortInfo>>;

    /// Open a port by name at the given baud rate.
    fn open(&mut self, name: &str, baud_rate: u32) -> Result<Self::Port>;

    /// Sleep for the given duration.
    fn sleep(&mut self, duration: Duration);
}

pub use native::{NativeHost, NativePort};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.timeout, Duration::from_millis(1000));
    }

    #[test]
    fn serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyACM0", 1200).with_timeout(Duration::from_secs(5));

        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 1200);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn port_info_named_has_no_usb_metadata() {
        let info = PortInfo::named("COM7");
        assert_eq!(info.name, "COM7");
        assert_eq!(info.vid, None);
        assert_eq!(info.pid, None);
    }

    #[derive(Default)]
    struct SinkPort {
        sent: Vec<u8>,
        flushed: bool,
        closed: bool,
    }

    impl Read for SinkPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for SinkPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed = true;
            Ok(())
        }
    }

    impl Port for SinkPort {
        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    #[test]
    fn write_all_bytes_writes_everything_and_flushes() {
        let mut port = SinkPort::default();
        port.write_all_bytes(b"AV")
            .unwrap();
        assert_eq!(port.sent, b"AV");
        assert!(port.flushed);
    }

    #[test]
    fn close_releases_the_port() {
        let mut port = SinkPort::default();
        port.close()
            .unwrap();
        assert!(port.closed);
    }
}
