//! Caterina bootloader session: reset handshake and command protocol.
//!
//! A [`Session`] owns a [`Host`] and walks a device from whatever state it
//! is in to an open 57600-baud bootloader connection:
//!
//! 1. Discover a compatible board on the serial ports.
//! 2. If it enumerated in application mode, touch the port at 1200 baud and
//!    close it, which makes Caterina reset into the bootloader.
//! 3. Poll until the old port disappears, then until a compatible port
//!    reappears (USB re-enumeration usually changes the port name).
//! 4. Open the new port at 57600 baud, retrying while the OS catches up.
//!
//! Once connected, the typed command methods wrap the single-letter wire
//! protocol: `V` version, `j` JEDEC ID, `A` address select, `g` read, `B`
//! write, `x` status LED, `r` lock bits, `E` exit.

use std::io::Read;
use std::str;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, info};

use crate::cart::JedecId;
use crate::device::{self, DeviceMatch};
use crate::error::{Error, Result};
use crate::port::{Host, Port};

/// Oldest bootloader version with flash cart commands.
pub const MIN_CART_VERSION: u8 = 13;

/// Memory space selector: the terminator byte of `g`/`B` transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Memory {
    /// On-chip EEPROM (byte addressed).
    Eeprom = b'E',
    /// Application flash (word addressed).
    Flash = b'F',
    /// External flash cart (page addressed).
    Cart = b'C',
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No connection attempted yet.
    Unstarted,
    /// Touching the application port at 1200 baud.
    Touching,
    /// Waiting for the application port to drop off the bus.
    WaitingDisconnect,
    /// Waiting for the bootloader port to appear.
    WaitingReconnect,
    /// Bootloader connection open.
    Connected,
    /// Session ended with the `E` command.
    Exited,
}

/// Timing and retry knobs for the handshake.
///
/// Defaults match the behavior Caterina boards are known to tolerate;
/// tests shrink them through a scripted host instead.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Baud rate of the bootloader connection.
    pub boot_baud: u32,
    /// Magic baud rate whose open/close triggers the reset.
    pub touch_baud: u32,
    /// Settle time after the 1200-baud touch.
    pub touch_settle: Duration,
    /// Interval between enumeration polls.
    pub poll_interval: Duration,
    /// Attempts to open the bootloader port.
    pub open_attempts: usize,
    /// Delay before each open attempt.
    pub open_initial_delay: Duration,
    /// Extra delay after a failed open attempt.
    pub open_retry_delay: Duration,
    /// Gap between the two JEDEC ID reads.
    pub jedec_gap: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            boot_baud: 57600,
            touch_baud: 1200,
            touch_settle: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            open_attempts: 20,
            open_initial_delay: Duration::from_millis(100),
            open_retry_delay: Duration::from_millis(400),
            jedec_gap: Duration::from_millis(500),
        }
    }
}

/// A bootloader session over some host's serial ports.
pub struct Session<H: Host> {
    host: H,
    config: SessionConfig,
    cancel: Arc<AtomicBool>,
    port: Option<H::Port>,
    state: State,
}

impl<H: Host> Session<H> {
    /// Create a session with default timing.
    pub fn new(host: H) -> Self {
        Self::with_config(host, SessionConfig::default())
    }

    /// Create a session with explicit timing.
    pub fn with_config(host: H, config: SessionConfig) -> Self {
        Self {
            host,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            port: None,
            state: State::Unstarted,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Shared cancel flag.
    ///
    /// Setting it cuts the disconnect wait short; the handshake then
    /// proceeds with whatever port is present. Wire this to a Ctrl-C
    /// handler in interactive tools.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Access the underlying host.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Discover the device, reset it into the bootloader if needed, and
    /// open the bootloader connection.
    pub fn start(&mut self) -> Result<()> {
        let found = device::discover(&mut self.host, true)?.ok_or(Error::DeviceNotFound)?;
        let mut port_name = found
            .port
            .name
            .clone();

        if !found.boot_mode {
            info!("Selecting bootloader mode...");
            self.reset_into_bootloader(&found)?;
            let found =
                device::discover(&mut self.host, true)?.ok_or(Error::DeviceNotFound)?;
            port_name = found.port.name;
        }

        info!("Opening port {port_name}...");
        let port = self.open_with_retry(&port_name)?;
        self.port = Some(port);
        self.state = State::Connected;
        Ok(())
    }

    /// 1200-baud touch, then wait out the USB re-enumeration.
    fn reset_into_bootloader(&mut self, found: &DeviceMatch) -> Result<()> {
        let original = found
            .port
            .name
            .clone();

        self.state = State::Touching;
        let mut touch = self
            .host
            .open(&original, self.config.touch_baud)?;
        touch.close()?;
        drop(touch);
        self.host
            .sleep(self.config.touch_settle);

        // The application port lingers briefly before dropping off the bus.
        // A set cancel flag skips straight to the reconnect wait.
        self.state = State::WaitingDisconnect;
        loop {
            if self
                .cancel
                .load(Ordering::Relaxed)
            {
                debug!("Disconnect wait interrupted");
                break;
            }
            let ports = self
                .host
                .list_ports()?;
            match device::find_device(&ports) {
                Some(m) if m.port.name == original && !m.boot_mode => {
                    self.host
                        .sleep(self.config.poll_interval);
                }
                _ => break,
            }
        }

        // No timeout here: a board that never comes back is indistinguishable
        // from one the user is still plugging in.
        self.state = State::WaitingReconnect;
        loop {
            let ports = self
                .host
                .list_ports()?;
            if device::find_device(&ports).is_some() {
                return Ok(());
            }
            self.host
                .sleep(self.config.poll_interval);
        }
    }

    fn open_with_retry(&mut self, name: &str) -> Result<H::Port> {
        for attempt in 1..=self.config.open_attempts {
            self.host
                .sleep(self.config.open_initial_delay);
            match self
                .host
                .open(name, self.config.boot_baud)
            {
                Ok(port) => return Ok(port),
                Err(err) => {
                    debug!("Open attempt {attempt} failed: {err}");
                    if attempt == self.config.open_attempts {
                        break;
                    }
                    self.host
                        .sleep(self.config.open_retry_delay);
                }
            }
        }
        Err(Error::PortOpen {
            attempts: self.config.open_attempts,
        })
    }

    fn port_mut(&mut self) -> Result<&mut H::Port> {
        self.port
            .as_mut()
            .ok_or(Error::NotConnected)
    }

    fn read_ack(&mut self) -> Result<()> {
        let mut ack = [0u8; 1];
        self.port_mut()?
            .read_exact(&mut ack)?;
        Ok(())
    }

    /// `V`: bootloader version as a number (two ASCII digits on the wire).
    pub fn get_version(&mut self) -> Result<u8> {
        let port = self.port_mut()?;
        port.write_all_bytes(b"V")?;
        let mut reply = [0u8; 2];
        port.read_exact(&mut reply)?;
        str::from_utf8(&reply)
            .ok()
            .and_then(|text| {
                text.parse::<u8>()
                    .ok()
            })
            .ok_or_else(|| Error::Protocol(format!("bad version reply {reply:02X?}")))
    }

    /// `j` twice: JEDEC ID of the flash cart.
    ///
    /// The two reads must agree and must not be a floating-bus sentinel
    /// (all 0x00 or all 0xFF), otherwise there is no cart to talk to.
    pub fn get_jedec_id(&mut self) -> Result<JedecId> {
        let first = self.read_jedec_raw()?;
        self.host
            .sleep(self.config.jedec_gap);
        let second = self.read_jedec_raw()?;
        if first != second || first == [0x00; 3] || first == [0xFF; 3] {
            return Err(Error::NoFlashCart);
        }
        Ok(JedecId::from_bytes(first))
    }

    fn read_jedec_raw(&mut self) -> Result<[u8; 3]> {
        let port = self.port_mut()?;
        port.write_all_bytes(b"j")?;
        let mut id = [0u8; 3];
        port.read_exact(&mut id)?;
        Ok(id)
    }

    /// `A`: select a transfer address.
    ///
    /// The unit depends on the memory space of the following transfer:
    /// bytes for EEPROM, words for flash, 256-byte pages for the cart.
    pub fn select(&mut self, address: u16) -> Result<()> {
        let mut cmd = Vec::with_capacity(3);
        cmd.push(b'A');
        cmd.write_u16::<BigEndian>(address)?;
        self.port_mut()?
            .write_all_bytes(&cmd)?;
        self.read_ack()
    }

    /// `g`: read `len` bytes from the selected address.
    ///
    /// The wire length field is 16 bits; a full 64 KiB block is encoded as
    /// zero. The address cursor advances past the data read.
    pub fn read_bytes(&mut self, len: usize, memory: Memory) -> Result<Vec<u8>> {
        let mut cmd = Vec::with_capacity(4);
        cmd.push(b'g');
        cmd.write_u16::<BigEndian>(len as u16)?;
        cmd.push(memory as u8);
        let port = self.port_mut()?;
        port.write_all_bytes(&cmd)?;
        let mut data = vec![0u8; len];
        port.read_exact(&mut data)?;
        Ok(data)
    }

    /// `B`: write `data` at the selected address.
    ///
    /// A zero-length flash write erases the selected page without
    /// programming anything.
    pub fn write_bytes(&mut self, data: &[u8], memory: Memory) -> Result<()> {
        let mut cmd = Vec::with_capacity(4);
        cmd.push(b'B');
        cmd.write_u16::<BigEndian>(data.len() as u16)?;
        cmd.push(memory as u8);
        let port = self.port_mut()?;
        port.write_all_bytes(&cmd)?;
        if !data.is_empty() {
            port.write_all_bytes(data)?;
        }
        self.read_ack()
    }

    /// `x`: set the RGB LED / button status byte.
    pub fn set_status(&mut self, status: u8) -> Result<()> {
        self.port_mut()?
            .write_all_bytes(&[b'x', status])?;
        self.read_ack()
    }

    /// `r`: read the boot lock bits.
    pub fn read_lock_bits(&mut self) -> Result<u8> {
        let port = self.port_mut()?;
        port.write_all_bytes(b"r")?;
        let mut bits = [0u8; 1];
        port.read_exact(&mut bits)?;
        Ok(bits[0])
    }

    /// `E`: leave the bootloader and start the sketch.
    ///
    /// Consumes the session; the device is gone once this returns.
    pub fn exit(mut self) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or(Error::NotConnected)?;
        port.write_all_bytes(b"E")?;
        let mut ack = [0u8; 1];
        port.read_exact(&mut ack)?;
        self.state = State::Exited;
        Ok(())
    }
}
