//! Test doubles: a scripted Caterina bootloader and a scripted host.
//!
//! `MockDevice` speaks the single-letter wire protocol over an in-memory
//! byte stream and backs it with EEPROM/flash/cart arrays. `FakeHost`
//! replays a timeline of port enumeration snapshots and hands out clones of
//! one mock device, so handshake and transfer logic can run without
//! hardware or real delays.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cart::{BLOCK_SIZE, PAGE_SIZE};
use crate::eeprom;
use crate::error::{Error, Result};
use crate::port::{Host, Port, PortInfo};
use crate::session::Session;
use crate::sketch;

/// Build a USB serial port entry.
pub(crate) fn usb_port(name: &str, vid: u16, pid: u16) -> PortInfo {
    PortInfo {
        vid: Some(vid),
        pid: Some(pid),
        ..PortInfo::named(name)
    }
}

struct MockState {
    eeprom: Vec<u8>,
    flash: Vec<u8>,
    cart: Vec<u8>,
    version: [u8; 2],
    lock_bits: u8,
    jedec_replies: Vec<[u8; 3]>,
    jedec_reads: usize,
    corrupt_cart_page: Option<u16>,
    status_writes: Vec<u8>,
    cursor: u16,
    tx: Vec<u8>,
    rx: VecDeque<u8>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            eeprom: vec![0x00; eeprom::SIZE],
            flash: vec![0xFF; sketch::FLASH_SIZE],
            // Matches the default JEDEC reply: 2^0x12 bytes, four blocks.
            cart: vec![0xFF; 4 * BLOCK_SIZE],
            version: *b"13",
            lock_bits: 0x00,
            jedec_replies: vec![[0xEF, 0x40, 0x12]],
            jedec_reads: 0,
            corrupt_cart_page: None,
            status_writes: Vec::new(),
            cursor: 0,
            tx: Vec::new(),
            rx: VecDeque::new(),
        }
    }
}

impl MockState {
    /// Consume complete commands from the input stream.
    fn pump(&mut self) {
        loop {
            let Some(&cmd) = self
                .tx
                .first()
            else {
                return;
            };
            let consumed = match cmd {
                b'V' => {
                    self.rx
                        .extend(self.version);
                    1
                }
                b'j' => {
                    let index = self
                        .jedec_reads
                        .min(self.jedec_replies.len() - 1);
                    self.jedec_reads += 1;
                    self.rx
                        .extend(self.jedec_replies[index]);
                    1
                }
                b'r' => {
                    self.rx
                        .push_back(self.lock_bits);
                    1
                }
                b'E' => {
                    self.rx
                        .push_back(b'\r');
                    1
                }
                b'x' => {
                    if self.tx.len() < 2 {
                        return;
                    }
                    self.status_writes
                        .push(self.tx[1]);
                    self.rx
                        .push_back(b'\r');
                    2
                }
                b'A' => {
                    if self.tx.len() < 3 {
                        return;
                    }
                    self.cursor = u16::from_be_bytes([self.tx[1], self.tx[2]]);
                    self.rx
                        .push_back(b'\r');
                    3
                }
                b'g' => {
                    if self.tx.len() < 4 {
                        return;
                    }
                    let len = match u16::from_be_bytes([self.tx[1], self.tx[2]]) {
                        0 => BLOCK_SIZE,
                        n => n as usize,
                    };
                    let reply = self.region_read(self.tx[3], len);
                    self.rx
                        .extend(reply);
                    4
                }
                b'B' => {
                    if self.tx.len() < 4 {
                        return;
                    }
                    let wire_len = u16::from_be_bytes([self.tx[1], self.tx[2]]);
                    let terminator = self.tx[3];
                    let payload = match (terminator, wire_len) {
                        // Zero-length flash write: erase the selected page.
                        (b'F', 0) => 0,
                        (_, 0) => BLOCK_SIZE,
                        (_, n) => n as usize,
                    };
                    if self.tx.len() < 4 + payload {
                        return;
                    }
                    if terminator == b'F' && payload == 0 {
                        let offset = self.cursor as usize * 2;
                        self.flash[offset..offset + sketch::PAGE_SIZE].fill(0xFF);
                    } else {
                        let data: Vec<u8> = self.tx[4..4 + payload].to_vec();
                        self.region_write(terminator, &data);
                    }
                    self.rx
                        .push_back(b'\r');
                    4 + payload
                }
                _ => 1,
            };
            self.tx
                .drain(..consumed);
        }
    }

    fn region_read(&self, terminator: u8, len: usize) -> Vec<u8> {
        let (region, offset): (&[u8], usize) = match terminator {
            b'E' => (&self.eeprom, self.cursor as usize),
            b'F' => (&self.flash, self.cursor as usize * 2),
            _ => (&self.cart, self.cursor as usize * PAGE_SIZE),
        };
        let mut data = region[offset..offset + len].to_vec();
        if terminator == b'C' && self.corrupt_cart_page == Some(self.cursor) {
            data[0] ^= 0xFF;
        }
        data
    }

    fn region_write(&mut self, terminator: u8, data: &[u8]) {
        let (region, offset): (&mut Vec<u8>, usize) = match terminator {
            b'E' => (&mut self.eeprom, self.cursor as usize),
            b'F' => (&mut self.flash, self.cursor as usize * 2),
            _ => (&mut self.cart, self.cursor as usize * PAGE_SIZE),
        };
        region[offset..offset + data.len()].copy_from_slice(data);
    }
}

/// A scripted bootloader behind a cloneable handle.
#[derive(Clone)]
pub(crate) struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap()
    }

    pub(crate) fn set_version(&self, version: &[u8; 2]) {
        self.lock()
            .version = *version;
    }

    pub(crate) fn set_lock_bits(&self, bits: u8) {
        self.lock()
            .lock_bits = bits;
    }

    pub(crate) fn set_jedec_replies(&self, replies: Vec<[u8; 3]>) {
        let mut state = self.lock();
        state.jedec_replies = replies;
        state.jedec_reads = 0;
    }

    pub(crate) fn corrupt_cart_reads_at_page(&self, page: u16) {
        self.lock()
            .corrupt_cart_page = Some(page);
    }

    pub(crate) fn status_writes(&self) -> Vec<u8> {
        self.lock()
            .status_writes
            .clone()
    }

    pub(crate) fn patch_eeprom(&self, offset: usize, data: &[u8]) {
        self.lock()
            .eeprom[offset..offset + data.len()]
            .copy_from_slice(data);
    }

    pub(crate) fn patch_flash(&self, offset: usize, data: &[u8]) {
        self.lock()
            .flash[offset..offset + data.len()]
            .copy_from_slice(data);
    }

    pub(crate) fn patch_cart(&self, offset: usize, data: &[u8]) {
        self.lock()
            .cart[offset..offset + data.len()]
            .copy_from_slice(data);
    }

    pub(crate) fn fill_cart(&self, byte: u8) {
        self.lock()
            .cart
            .fill(byte);
    }

    pub(crate) fn cart_slice(&self, offset: usize, len: usize) -> Vec<u8> {
        self.lock()
            .cart[offset..offset + len]
            .to_vec()
    }

    pub(crate) fn flash_slice(&self, offset: usize, len: usize) -> Vec<u8> {
        self.lock()
            .flash[offset..offset + len]
            .to_vec()
    }
}

impl Read for MockDevice {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.lock();
        if state
            .rx
            .is_empty()
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no reply pending",
            ));
        }
        let mut n = 0;
        while n < buf.len() {
            let Some(byte) = state
                .rx
                .pop_front()
            else {
                break;
            };
            buf[n] = byte;
            n += 1;
        }
        Ok(n)
    }
}

impl Write for MockDevice {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.lock();
        state
            .tx
            .extend_from_slice(buf);
        state.pump();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockDevice {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A host whose enumeration results and clock are scripted.
pub(crate) struct FakeHost {
    /// Enumeration snapshots, one per `list_ports` call; the last one
    /// repeats forever.
    pub snapshots: VecDeque<Vec<PortInfo>>,
    /// The device every successful open hands back.
    pub device: MockDevice,
    /// Failures to inject before a non-touch open succeeds.
    pub open_failures: usize,
    /// Names of ports touched at 1200 baud.
    pub touches: Vec<String>,
    /// Every open attempt, as (port name, baud rate).
    pub opened: Vec<(String, u32)>,
    /// Every sleep requested.
    pub slept: Vec<Duration>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self {
            snapshots: VecDeque::new(),
            device: MockDevice::new(),
            open_failures: 0,
            touches: Vec::new(),
            opened: Vec::new(),
            slept: Vec::new(),
        }
    }

    pub(crate) fn push_snapshot(&mut self, ports: Vec<PortInfo>) {
        self.snapshots
            .push_back(ports);
    }

    /// A session already connected to a bootloader-mode device.
    pub(crate) fn connected_session() -> Session<Self> {
        let mut host = Self::new();
        host.push_snapshot(vec![usb_port("/dev/ttyACM0", 0x2341, 0x0036)]);
        let mut session = Session::new(host);
        session
            .start()
            .unwrap();
        session
    }
}

impl Host for FakeHost {
    type Port = MockDevice;

    fn list_ports(&mut self) -> Result<Vec<PortInfo>> {
        if self
            .snapshots
            .len()
            > 1
        {
            Ok(self
                .snapshots
                .pop_front()
                .unwrap_or_default())
        } else {
            Ok(self
                .snapshots
                .front()
                .cloned()
                .unwrap_or_default())
        }
    }

    fn open(&mut self, name: &str, baud_rate: u32) -> Result<MockDevice> {
        self.opened
            .push((name.to_string(), baud_rate));
        if baud_rate == 1200 {
            self.touches
                .push(name.to_string());
            return Ok(self
                .device
                .clone());
        }
        if self.open_failures > 0 {
            self.open_failures -= 1;
            return Err(Error::Serial(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "port busy",
            )));
        }
        Ok(self
            .device
            .clone())
    }

    fn sleep(&mut self, duration: Duration) {
        self.slept
            .push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_answers_version_and_status() {
        let mut device = MockDevice::new();
        device
            .write_all(b"V")
            .unwrap();
        let mut reply = [0u8; 2];
        device
            .read_exact(&mut reply)
            .unwrap();
        assert_eq!(&reply, b"13");

        device
            .write_all(&[b'x', 0x44])
            .unwrap();
        let mut ack = [0u8; 1];
        device
            .read_exact(&mut ack)
            .unwrap();
        assert_eq!(device.status_writes(), vec![0x44]);
    }

    #[test]
    fn mock_times_out_with_nothing_pending() {
        let mut device = MockDevice::new();
        let mut buf = [0u8; 1];
        assert!(device
            .read(&mut buf)
            .is_err());
    }

    #[test]
    fn mock_handles_partial_command_writes() {
        let mut device = MockDevice::new();
        // Address select split across two writes.
        device
            .write_all(&[b'A', 0x00])
            .unwrap();
        device
            .write_all(&[0x04])
            .unwrap();
        let mut ack = [0u8; 1];
        device
            .read_exact(&mut ack)
            .unwrap();
        assert_eq!(
            device
                .lock()
                .cursor,
            4
        );
    }
}
