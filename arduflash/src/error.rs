//! Error types for arduflash.

use std::io;
use thiserror::Error;

/// Result type for arduflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for arduflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No compatible board found on any serial port.
    #[error("Arduboy not found")]
    DeviceNotFound,

    /// The bootloader port never became openable after the reset handshake.
    #[error("Opening port failed after {attempts} attempts")]
    PortOpen {
        /// Number of open attempts made.
        attempts: usize,
    },

    /// The bootloader is too old for the requested operation.
    #[error("Bootloader version {version} has no flash cart support")]
    UnsupportedBootloader {
        /// Version reported by the device.
        version: u8,
    },

    /// The JEDEC ID was unstable between reads or a bus sentinel value.
    #[error("No flash cart detected")]
    NoFlashCart,

    /// Read-back after write did not match what was written.
    #[error("Verify failed at block {block}")]
    VerifyFailed {
        /// Index of the first mismatching block (or flash page).
        block: usize,
    },

    /// Malformed or wrong-sized input file.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Image decoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Flashcart index parsing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Unexpected reply from the bootloader.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A command was issued outside of a connected session.
    #[error("Session is not connected")]
    NotConnected,
}
