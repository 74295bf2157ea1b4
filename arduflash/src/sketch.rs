//! Application flash operations: backup, erase, and sketch upload.

use log::info;

use crate::error::{Error, Result};
use crate::image::hex::SketchImage;
use crate::port::Host;
use crate::session::{Memory, Session};

/// Application flash size in bytes (ATmega32U4).
pub const FLASH_SIZE: usize = 32768;
/// Flash page size in bytes.
pub const PAGE_SIZE: usize = 128;
/// Number of flash pages.
pub const PAGE_COUNT: usize = FLASH_SIZE / PAGE_SIZE;
/// First page of the bootloader area.
pub const BOOTLOADER_FIRST_PAGE: usize = 224;
/// Bytes saved by a sketch backup: application area up to the flashcart
/// loader's own storage.
pub const BACKUP_SIZE: usize = 0x7000;

/// Word address of a 128-byte flash page (flash is word addressed).
fn page_address(page: usize) -> u16 {
    (page * (PAGE_SIZE / 2)) as u16
}

/// Read the application area of flash.
pub fn backup<H: Host>(session: &mut Session<H>) -> Result<Vec<u8>> {
    session.select(0)?;
    session.read_bytes(BACKUP_SIZE, Memory::Flash)
}

/// Erase the startup page so the bootloader no longer boots the sketch.
///
/// Returns true when the page reads back blank.
pub fn erase_startup_page<H: Host>(session: &mut Session<H>) -> Result<bool> {
    session.select(0)?;
    // A zero-length write erases the selected page without programming.
    session.write_bytes(&[], Memory::Flash)?;
    session.select(0)?;
    let page = session.read_bytes(PAGE_SIZE, Memory::Flash)?;
    Ok(page
        .iter()
        .all(|&b| b == 0xFF))
}

/// Flash a parsed sketch and verify it page by page.
///
/// `progress` is called with (steps done, steps total) where the total
/// covers both the flash pass and the verify pass.
pub fn upload<H, F>(session: &mut Session<H>, image: &SketchImage, mut progress: F) -> Result<()>
where
    H: Host,
    F: FnMut(usize, usize),
{
    // Caterina 1.0 keeps its boot section locked; writing into it would
    // brick the board, so refuse sketches that reach the bootloader area.
    if session.get_version()? == 10 {
        let lock = session.read_lock_bits()?;
        if lock & 0x10 != 0 && image.overlaps_bootloader() {
            return Err(Error::Protocol(
                "sketch overlaps the locked bootloader area".into(),
            ));
        }
    }

    let pages: Vec<usize> = image
        .used_pages()
        .collect();
    let total = pages.len() * 2;
    let mut done = 0;

    info!("Flashing {} pages", pages.len());
    for &page in &pages {
        session.select(page_address(page))?;
        session.write_bytes(image.page(page), Memory::Flash)?;
        done += 1;
        progress(done, total);
    }

    info!("Verifying {} pages", pages.len());
    for &page in &pages {
        session.select(page_address(page))?;
        let readback = session.read_bytes(PAGE_SIZE, Memory::Flash)?;
        if readback != image.page(page) {
            return Err(Error::VerifyFailed { block: page });
        }
        done += 1;
        progress(done, total);
    }
    Ok(())
}
