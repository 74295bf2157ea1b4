//! Flashcart image builder.
//!
//! Builds a flashcart image from a CSV index. Every row becomes one slot:
//! a 256-byte header, a 1024-byte packed title screen, the sketch's program
//! data (when the row names a hex file), and a page-aligned data file (when
//! the row names one). Slots form a doubly linked list through the
//! previous/next page fields in their headers, which is how the on-device
//! loader walks the cart.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::image::hex::SketchImage;

/// Slot header size in bytes (one cart page).
pub const HEADER_SIZE: usize = 256;
/// Packed title screen size in bytes (four cart pages).
pub const TITLE_SIZE: usize = 1024;
/// Title screen width in pixels.
pub const TITLE_WIDTH: u32 = 128;
/// Title screen height in pixels.
pub const TITLE_HEIGHT: u32 = 64;

/// Magic bytes opening every slot header.
const MAGIC: &[u8; 7] = b"ARDUBOY";

/// One row of the build summary.
#[derive(Debug, Clone)]
pub struct SlotSummary {
    /// Category number from the index.
    pub list: u8,
    /// Title (usually the title screen's menu entry).
    pub title: String,
    /// First page of the slot.
    pub page: u32,
    /// Slot size in 256-byte pages.
    pub pages: u32,
    /// True when the slot carries a sketch.
    pub has_program: bool,
}

/// Result of building a flashcart image.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Per-slot summaries, in cart order.
    pub slots: Vec<SlotSummary>,
    /// Number of sketches on the cart.
    pub sketches: usize,
    /// Total image size in 256-byte pages.
    pub pages: u32,
}

impl BuildReport {
    /// Image size in KiB (rounded up).
    pub fn kibibytes(&self) -> u32 {
        (self.pages + 3) / 4
    }
}

/// Load a 128x64 title screen image and pack it to 1024 bytes.
///
/// Pixels brighter than mid-gray are lit. Packing is the display's native
/// layout: each byte is a column of 8 pixels, bit 0 on top.
pub fn load_title_screen(path: &Path) -> Result<Vec<u8>> {
    let img = image::open(path)?.to_luma8();
    if img.width() != TITLE_WIDTH || img.height() != TITLE_HEIGHT {
        return Err(Error::InvalidImage(format!(
            "title screen {} is {}x{}, must be {TITLE_WIDTH}x{TITLE_HEIGHT}",
            path.display(),
            img.width(),
            img.height()
        )));
    }

    let mut packed = Vec::with_capacity(TITLE_SIZE);
    for y in (0..TITLE_HEIGHT).step_by(8) {
        for x in 0..TITLE_WIDTH {
            let mut bits = 0u8;
            for p in 0..8 {
                bits >>= 1;
                if img.get_pixel(x, y + p)[0] > 127 {
                    bits |= 0x80;
                }
            }
            packed.push(bits);
        }
    }
    Ok(packed)
}

fn resolve(base: &Path, field: &str) -> PathBuf {
    let path = Path::new(field);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn put_page(buf: &mut [u8], offset: usize, page: u32) {
    buf[offset] = (page >> 8) as u8;
    buf[offset + 1] = page as u8;
}

/// Build a flashcart image from a `;`-separated CSV index.
///
/// Columns: `list;title;titlescreen;hexfile;datafile;savefile`. The first
/// row is a header and is skipped. File paths are resolved relative to the
/// index file. Rows without a hex file become title-screen-only slots
/// (category headings); a named hex file that does not exist is treated
/// the same way, with a warning.
pub fn build_image<W: Write>(csv_path: &Path, out: &mut W) -> Result<BuildReport> {
    let base = csv_path
        .parent()
        .unwrap_or_else(|| Path::new(""));
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .quote(b'"')
        .flexible(true)
        .has_headers(true)
        .from_path(csv_path)?;

    let mut previous_page: u32 = 0xFFFF;
    let mut current_page: u32 = 0;
    let mut next_page: u32 = 0;
    let mut slots = Vec::new();
    let mut sketches = 0;

    for (row, record) in reader
        .records()
        .enumerate()
    {
        let record = record?;
        let field = |i: usize| {
            record
                .get(i)
                .unwrap_or("")
                .trim()
        };

        let list: u8 = field(0)
            .parse()
            .map_err(|_| {
                Error::InvalidImage(format!("row {}: bad list number {:?}", row + 2, field(0)))
            })?;
        let title = field(1).to_string();
        let title_screen = load_title_screen(&resolve(base, field(2)))?;

        let mut program = Vec::new();
        if !field(3).is_empty() {
            let path = resolve(base, field(3));
            if path.exists() {
                program = SketchImage::load(&path)?
                    .program_data()
                    .to_vec();
            } else {
                warn!("row {}: hex file {} not found, skipping", row + 2, path.display());
            }
        }

        let mut data = Vec::new();
        if !field(4).is_empty() {
            let path = resolve(base, field(4));
            if path.exists() {
                data = fs::read(&path)?;
                let padded = data
                    .len()
                    .div_ceil(HEADER_SIZE)
                    * HEADER_SIZE;
                data.resize(padded, 0xFF);
            } else {
                warn!("row {}: data file {} not found, skipping", row + 2, path.display());
            }
        }

        let program_size = program.len();
        let data_size = data.len();
        let slot_pages = ((program_size + data_size) >> 8) as u32 + 5;
        let program_page = current_page + 5;
        let data_page = program_page + (program_size >> 8) as u32;
        next_page += slot_pages;
        debug!("Slot {:>3}: page {current_page}, {slot_pages} pages, {title}", slots.len());

        let mut header = vec![0xFFu8; HEADER_SIZE];
        header[..MAGIC.len()].copy_from_slice(MAGIC);
        header[7] = list;
        put_page(&mut header, 8, previous_page);
        put_page(&mut header, 10, next_page);
        put_page(&mut header, 12, slot_pages);
        header[14] = (program_size >> 7) as u8;
        if program_size > 0 {
            put_page(&mut header, 15, program_page);
        }
        if data_size > 0 {
            put_page(&mut header, 17, data_page);
            if program_size > 0 {
                // Patch the data page into the sketch at the fixed vector
                // slot reserved for it.
                if program_size < 0x18 {
                    return Err(Error::InvalidImage(format!(
                        "row {}: program too small to carry a data page pointer",
                        row + 2
                    )));
                }
                program[0x14] = 0x18;
                program[0x15] = 0x95;
                program[0x16] = (data_page >> 8) as u8;
                program[0x17] = data_page as u8;
            }
        }

        out.write_all(&header)?;
        out.write_all(&title_screen)?;
        out.write_all(&program)?;
        out.write_all(&data)?;

        if program_size > 0 {
            sketches += 1;
        }
        slots.push(SlotSummary {
            list,
            title,
            page: current_page,
            pages: slot_pages,
            has_program: program_size > 0,
        });
        previous_page = current_page;
        current_page = next_page;
    }

    Ok(BuildReport {
        slots,
        sketches,
        pages: next_page,
    })
}
