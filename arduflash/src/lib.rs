//! # arduflash
//!
//! A library for talking to the Caterina serial bootloader on Arduboy and
//! compatible ATmega32U4 boards.
//!
//! This crate provides:
//!
//! - Device discovery by USB VID/PID, with bootloader/application mode
//!   classification
//! - The 1200-baud reset handshake and re-enumeration wait
//! - The bootloader command protocol: EEPROM, application flash, and
//!   external flash cart transfers
//! - File transforms: Intel-HEX sketches, sprite sheets, title screens,
//!   and flashcart image building
//!
//! ## Example
//!
//! ```rust,no_run
//! use arduflash::port::NativeHost;
//! use arduflash::{Session, eeprom};
//!
//! fn main() -> arduflash::Result<()> {
//!     let mut session = Session::new(NativeHost::default());
//!     session.start()?;
//!
//!     let data = eeprom::backup(&mut session)?;
//!     std::fs::write("eeprom.bin", data)?;
//!
//!     session.exit()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cart;
pub mod device;
pub mod eeprom;
pub mod error;
pub mod image;
pub mod port;
pub mod session;
pub mod sketch;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use {
    cart::JedecId,
    device::{Board, COMPATIBLE_DEVICES, DeviceMatch, discover, find_device},
    error::{Error, Result},
    port::{Host, NativeHost, NativePort, Port, PortInfo, SerialConfig},
    session::{MIN_CART_VERSION, Memory, Session, SessionConfig, State},
};
