//! Flash cart block transfer.
//!
//! External flash carts are addressed in 256-byte pages and moved over the
//! wire in 64 KiB blocks. Writes must cover whole blocks, so a write that
//! starts or ends mid-block first reads back the neighboring data and folds
//! it into the payload.

use log::{debug, info};

use crate::error::{Error, Result};
use crate::port::Host;
use crate::session::{Memory, Session};

/// Cart page size in bytes.
pub const PAGE_SIZE: usize = 256;
/// Transfer block size in bytes.
pub const BLOCK_SIZE: usize = 65536;
/// Pages per transfer block.
pub const PAGES_PER_BLOCK: usize = BLOCK_SIZE / PAGE_SIZE;
/// Largest page number any cart can have.
pub const MAX_PAGES: usize = 65536;

/// Status byte: LEDs off, buttons disabled.
pub const LED_OFF: u8 = 0xC0;
/// Status byte: read activity.
pub const LED_READ: u8 = 0xC1;
/// Status byte: write activity.
pub const LED_WRITE: u8 = 0xC2;
/// Status byte: green LED, buttons re-enabled. Sent when a transfer ends.
pub const LED_DONE: u8 = 0x44;

/// JEDEC identification of a flash chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JedecId {
    /// Manufacturer byte.
    pub manufacturer: u8,
    /// Device type byte.
    pub device: u8,
    /// Capacity as a power-of-two exponent.
    pub capacity_exp: u8,
}

impl JedecId {
    /// Build from the three bytes of a `j` reply.
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            manufacturer: bytes[0],
            device: bytes[1],
            capacity_exp: bytes[2],
        }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        1 << self.capacity_exp
    }

    /// Whole 64 KiB blocks on the chip.
    pub fn blocks(&self) -> usize {
        self.capacity() / BLOCK_SIZE
    }

    /// Manufacturer name, if the ID byte is a known vendor.
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        let name = match self.manufacturer {
            0x01 => "Spansion",
            0x14 => "Cypress",
            0x1C => "EON",
            0x1F => "Adesto(Atmel)",
            0x20 => "Micron",
            0x37 => "AMIC",
            0x9D => "ISSI",
            0xBF => "Microchip",
            0xC2 => "General Plus",
            0xC8 => "Giga Device",
            0xEF => "Winbond",
            _ => return None,
        };
        Some(name)
    }
}

/// Read `blocks` whole blocks from the start of the cart.
///
/// `progress` is called with (blocks done, blocks total) after each block.
pub fn read_cart<H, F>(session: &mut Session<H>, blocks: usize, mut progress: F) -> Result<Vec<u8>>
where
    H: Host,
    F: FnMut(usize, usize),
{
    info!("Reading {blocks} blocks");
    let mut data = Vec::with_capacity(blocks * BLOCK_SIZE);
    for block in 0..blocks {
        session.set_status(if block % 2 == 0 { LED_READ } else { LED_OFF })?;
        session.select((block * PAGES_PER_BLOCK) as u16)?;
        let chunk = session.read_bytes(BLOCK_SIZE, Memory::Cart)?;
        data.extend_from_slice(&chunk);
        progress(block + 1, blocks);
    }
    session.set_status(LED_DONE)?;
    Ok(data)
}

/// Write `data` to the cart starting at `start_page`.
///
/// The payload is padded to a page multiple with 0xFF. When the write does
/// not start or end on a block boundary, the surrounding data is read back
/// first so the full-block writes do not clobber it. With `verify`, every
/// block is read back after writing; the first mismatch aborts with
/// [`Error::VerifyFailed`] (blocks already written stay written).
pub fn write_cart<H, F>(
    session: &mut Session<H>,
    start_page: u16,
    data: Vec<u8>,
    verify: bool,
    mut progress: F,
) -> Result<()>
where
    H: Host,
    F: FnMut(usize, usize),
{
    let mut data = data;
    if data.len() % PAGE_SIZE != 0 {
        let padded = data
            .len()
            .div_ceil(PAGE_SIZE)
            * PAGE_SIZE;
        data.resize(padded, 0xFF);
    }

    let mut page = start_page;
    if page as usize % PAGES_PER_BLOCK != 0 {
        let block_page = page - (page as usize % PAGES_PER_BLOCK) as u16;
        let head_len = (page - block_page) as usize * PAGE_SIZE;
        debug!("Keeping {head_len} bytes before page {page}");
        session.select(block_page)?;
        let mut head = session.read_bytes(head_len, Memory::Cart)?;
        head.extend_from_slice(&data);
        data = head;
        page = block_page;
    }
    if data.len() % BLOCK_SIZE != 0 {
        let tail_len = BLOCK_SIZE - data.len() % BLOCK_SIZE;
        let tail_page = page + (data.len() / PAGE_SIZE) as u16;
        debug!("Keeping {tail_len} bytes after page {tail_page}");
        session.select(tail_page)?;
        let tail = session.read_bytes(tail_len, Memory::Cart)?;
        data.extend_from_slice(&tail);
    }

    let blocks = data.len() / BLOCK_SIZE;
    info!("Writing {blocks} blocks at page {page}");
    for block in 0..blocks {
        session.set_status(if block % 2 == 0 { LED_WRITE } else { LED_OFF })?;
        let block_page = page + (block * PAGES_PER_BLOCK) as u16;
        let chunk = &data[block * BLOCK_SIZE..(block + 1) * BLOCK_SIZE];
        session.select(block_page)?;
        session.write_bytes(chunk, Memory::Cart)?;
        if verify {
            session.select(block_page)?;
            let readback = session.read_bytes(BLOCK_SIZE, Memory::Cart)?;
            if readback != chunk {
                session
                    .set_status(LED_DONE)
                    .ok();
                return Err(Error::VerifyFailed { block });
            }
        }
        progress(block + 1, blocks);
    }
    session.set_status(LED_DONE)?;
    Ok(())
}
