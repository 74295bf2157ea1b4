//! Intel-HEX sketch parser.
//!
//! Only data records (type 00) carry flash contents; an end-of-file record
//! (type 01) stops parsing and every other record type is skipped. Records
//! land in a 32 KiB buffer preloaded with 0xFF, and a per-page bitmap
//! remembers which 128-byte flash pages actually received data so the
//! uploader can skip untouched ones.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::sketch::{BOOTLOADER_FIRST_PAGE, FLASH_SIZE, PAGE_COUNT, PAGE_SIZE};

/// A sketch decoded from an Intel-HEX file.
#[derive(Debug, Clone)]
pub struct SketchImage {
    data: Vec<u8>,
    page_used: [bool; PAGE_COUNT],
    end: usize,
}

impl SketchImage {
    /// Parse Intel-HEX text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut data = vec![0xFF; FLASH_SIZE];
        let mut page_used = [false; PAGE_COUNT];
        let mut end = 0usize;

        for (lineno, line) in text
            .lines()
            .enumerate()
        {
            let line = line.trim();
            let Some(body) = line.strip_prefix(':') else {
                continue;
            };
            let record = decode_hex(body)
                .ok_or_else(|| Error::InvalidImage(format!("bad hex digits on line {}", lineno + 1)))?;
            if record.len() < 5 {
                return Err(Error::InvalidImage(format!(
                    "truncated record on line {}",
                    lineno + 1
                )));
            }

            let len = record[0] as usize;
            let addr = usize::from(u16::from_be_bytes([record[1], record[2]]));
            let kind = record[3];
            if record.len() != 5 + len {
                return Err(Error::InvalidImage(format!(
                    "record length mismatch on line {}",
                    lineno + 1
                )));
            }
            // The checksum byte makes the whole record sum to zero mod 256.
            let sum = record
                .iter()
                .fold(0u8, |acc, &b| acc.wrapping_add(b));
            if sum != 0 {
                return Err(Error::InvalidImage(format!(
                    "checksum error on line {}",
                    lineno + 1
                )));
            }

            match kind {
                0x01 => break,
                0x00 if len > 0 => {
                    if addr + len > FLASH_SIZE {
                        return Err(Error::InvalidImage(format!(
                            "record outside flash on line {}",
                            lineno + 1
                        )));
                    }
                    data[addr..addr + len].copy_from_slice(&record[4..4 + len]);
                    for page in addr / PAGE_SIZE..=(addr + len - 1) / PAGE_SIZE {
                        page_used[page] = true;
                    }
                    end = end.max(addr + len);
                }
                _ => {}
            }
        }

        Ok(Self {
            data,
            page_used,
            end,
        })
    }

    /// Parse an Intel-HEX file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// One 128-byte flash page.
    pub fn page(&self, index: usize) -> &[u8] {
        &self.data[index * PAGE_SIZE..(index + 1) * PAGE_SIZE]
    }

    /// Indices of pages that received data, in ascending order.
    pub fn used_pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.page_used
            .iter()
            .enumerate()
            .filter(|&(_, &used)| used)
            .map(|(i, _)| i)
    }

    /// Number of used pages.
    pub fn used_page_count(&self) -> usize {
        self.page_used
            .iter()
            .filter(|&&used| used)
            .count()
    }

    /// True when any data lands in the bootloader area.
    pub fn overlaps_bootloader(&self) -> bool {
        self.page_used[BOOTLOADER_FIRST_PAGE..]
            .iter()
            .any(|&used| used)
    }

    /// Program size, rounded up to a 256-byte cart page.
    pub fn program_len(&self) -> usize {
        self.end
            .div_ceil(256)
            * 256
    }

    /// Program bytes, trimmed to [`Self::program_len`].
    pub fn program_data(&self) -> &[u8] {
        &self.data[..self.program_len()]
    }
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}
