//! NAND media layer (spec.md §4.A): page/block read, erase, write, ECC
//! correction, and bank selection. This module models the hardware
//! controller as a trait — the real AES/SHA/NAND engines are external
//! collaborators per spec.md §1 — and supplies the ECC-correction
//! algorithm, which is in-scope core logic rather than a hardware detail.

pub mod ecc;

#[cfg(any(test, not(feature = "no_std")))]
pub mod ram;

use crate::error::NandError;
use crate::geometry::{Bank, PAGE_SIZE, SPARE_SIZE};

/// Outcome of a successful page read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadGrade {
    /// Stored and computed ECC tags matched exactly.
    Ok,
    /// One or more sub-pages needed single-bit correction. This is the
    /// trigger condition boot1 uses to schedule an isfshax refresh
    /// (spec.md §4.D).
    Corrected,
}

/// A page/block-addressable NAND device, exposing exactly the operations
/// the volume codec and superblock manager need (spec.md §4.A interface).
///
/// `write_page`/`erase_block` are present unconditionally: although the
/// original source gates them behind a `NAND_WRITE_ENABLED` build macro,
/// that macro is always defined to `1` in the kept sources, and isfshax
/// refresh depends on them unconditionally.
pub trait NandDevice {
    /// Selects which NAND bank (`slc` or `slccmpt`) subsequent operations
    /// address.
    fn select_bank(&mut self, bank: Bank);

    /// Reads one page's data and spare area, correcting single-bit ECC
    /// errors in place. Returns [`ReadGrade::Corrected`] if any sub-page
    /// needed a fix, [`NandError`] if an error could not be corrected or
    /// the controller faulted.
    fn read_page(
        &mut self,
        page: u32,
        data: &mut [u8; PAGE_SIZE],
        spare: &mut [u8; SPARE_SIZE],
    ) -> Result<ReadGrade, NandError>;

    /// Writes one page's data and spare area. The spare's byte 0 is
    /// forced to `0xFF` and bytes `0x30..0x40` are overwritten with the
    /// controller-computed ECC of `data`, matching `nand_write_page`'s
    /// spare preparation.
    fn write_page(
        &mut self,
        page: u32,
        data: &[u8; PAGE_SIZE],
        spare: &[u8; SPARE_SIZE],
    ) -> Result<(), NandError>;

    /// Erases one block (the unit of erasure, `BLOCK_PAGES` pages).
    fn erase_block(&mut self, block: u32) -> Result<(), NandError>;
}
