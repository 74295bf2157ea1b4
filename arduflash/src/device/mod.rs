//! Device discovery and classification.
//!
//! Arduboy-compatible boards enumerate under two USB identities: one while
//! the Caterina bootloader is running and another once the application
//! sketch takes over. Discovery scans the serial ports and classifies the
//! first compatible identity it finds, so the session layer knows whether a
//! reset handshake is needed before it can talk to the bootloader.

use log::info;

use crate::error::Result;
use crate::port::{Host, PortInfo};

/// A known board identity: one USB VID/PID pair and the board it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
    /// Human-readable board name.
    pub name: &'static str,
}

/// USB identities of Arduboy-compatible boards.
///
/// Entries come in adjacent pairs per board: the even index is the
/// bootloader-mode identity and the odd index is the application-mode
/// identity. [`find_device`] relies on this parity to classify matches.
pub const COMPATIBLE_DEVICES: &[Board] = &[
    Board { vid: 0x2341, pid: 0x0036, name: "Arduino Leonardo" },
    Board { vid: 0x2341, pid: 0x8036, name: "Arduino Leonardo" },
    Board { vid: 0x2A03, pid: 0x0036, name: "Arduino Leonardo" },
    Board { vid: 0x2A03, pid: 0x8036, name: "Arduino Leonardo" },
    Board { vid: 0x2341, pid: 0x0037, name: "Arduino Micro" },
    Board { vid: 0x2341, pid: 0x8037, name: "Arduino Micro" },
    Board { vid: 0x2A03, pid: 0x0037, name: "Arduino Micro" },
    Board { vid: 0x2A03, pid: 0x8037, name: "Arduino Micro" },
    Board { vid: 0x2341, pid: 0x0237, name: "Genuino Micro" },
    Board { vid: 0x2341, pid: 0x8237, name: "Genuino Micro" },
    Board { vid: 0x1B4F, pid: 0x9205, name: "SparkFun Pro Micro 5V" },
    Board { vid: 0x1B4F, pid: 0x9206, name: "SparkFun Pro Micro 5V" },
    Board { vid: 0x239A, pid: 0x000E, name: "Adafruit ItsyBitsy 5V" },
    Board { vid: 0x239A, pid: 0x800E, name: "Adafruit ItsyBitsy 5V" },
];

/// A compatible board found on a serial port.
#[derive(Debug, Clone)]
pub struct DeviceMatch {
    /// The port the board was found on.
    pub port: PortInfo,
    /// The matched identity.
    pub board: &'static Board,
    /// True when the board enumerated with its bootloader-mode identity.
    pub boot_mode: bool,
}

impl DeviceMatch {
    /// Display name: the USB product string when present, the table name
    /// otherwise.
    pub fn product_name(&self) -> &str {
        self.port
            .product
            .as_deref()
            .unwrap_or(self.board.name)
    }
}

/// Classify a VID/PID pair against the compatibility table.
///
/// Returns the table index and entry; even indices are bootloader-mode
/// identities.
pub fn classify(vid: u16, pid: u16) -> Option<(usize, &'static Board)> {
    COMPATIBLE_DEVICES
        .iter()
        .enumerate()
        .find(|(_, board)| board.vid == vid && board.pid == pid)
}

/// Find the first compatible board in a port listing.
///
/// Ports are scanned in enumeration order and the first port carrying a
/// known identity wins; remaining ports are ignored.
pub fn find_device(ports: &[PortInfo]) -> Option<DeviceMatch> {
    for port in ports {
        let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
            continue;
        };
        if let Some((index, board)) = classify(vid, pid) {
            return Some(DeviceMatch {
                port: port.clone(),
                board,
                boot_mode: index % 2 == 0,
            });
        }
    }
    None
}

/// Enumerate ports and find the first compatible board.
///
/// With `verbose`, logs the outcome the way the interactive tools report it.
pub fn discover<H: Host>(host: &mut H, verbose: bool) -> Result<Option<DeviceMatch>> {
    let ports = host.list_ports()?;
    let found = find_device(&ports);
    if verbose {
        match &found {
            Some(m) => info!("Found {} at port {}", m.product_name(), m.port.name),
            None => info!("Arduboy not found."),
        }
    }
    Ok(found)
}
