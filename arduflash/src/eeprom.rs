//! On-chip EEPROM operations.

use crate::error::{Error, Result};
use crate::port::Host;
use crate::session::{Memory, Session};

/// EEPROM size in bytes (ATmega32U4).
pub const SIZE: usize = 1024;

/// Read the whole EEPROM.
pub fn backup<H: Host>(session: &mut Session<H>) -> Result<Vec<u8>> {
    session.select(0)?;
    session.read_bytes(SIZE, Memory::Eeprom)
}

/// Write the whole EEPROM. `data` must be exactly [`SIZE`] bytes.
pub fn restore<H: Host>(session: &mut Session<H>, data: &[u8]) -> Result<()> {
    if data.len() != SIZE {
        return Err(Error::InvalidImage(format!(
            "EEPROM image must be {SIZE} bytes, got {}",
            data.len()
        )));
    }
    session.select(0)?;
    session.write_bytes(data, Memory::Eeprom)
}

/// Erase the whole EEPROM (all bytes to 0xFF).
pub fn erase<H: Host>(session: &mut Session<H>) -> Result<()> {
    restore(session, &[0xFF; SIZE])
}
