//! A `std`-only, RAM-backed [`NandDevice`] used by the test suite.
//!
//! Mirrors the role of the teacher crate's `RefCell<File>` `Volume` impl
//! (gated by the same `cfg(any(test, not(feature = "no_std")))`): a
//! minimal, fully in-memory stand-in for the real hardware controller that
//! lets tests drive the ECC-correction and failure-injection paths
//! without real silicon.
//!
//! The per-subpage ECC tag this module computes is *not* a transcription
//! of the real Latte NAND controller's encoding (that hardware detail is
//! out of scope per spec.md §1) — it is a self-contained Hamming-style
//! construction invented for this double, built only so that
//! [`crate::nand::ecc::correct_subpage`] (which *is* a faithful port of
//! the real decode/verify logic) sees the same stored/computed
//! relationship real hardware would produce for a single-bit error.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::NandError;
use crate::geometry::{Bank, BLOCK_PAGES, PAGE_SIZE, SPARE_SIZE};
use crate::nand::ecc::{self, ECC_SIZE};
use crate::nand::{NandDevice, ReadGrade};

const ECC_STOR_OFFSET: usize = 0x30;
const SUBPAGE_SIZE: usize = 512;
const SUBPAGES_PER_PAGE: usize = PAGE_SIZE / SUBPAGE_SIZE;

fn encode_subpage_ecc(sub: &[u8]) -> u32 {
    debug_assert_eq!(sub.len(), SUBPAGE_SIZE);

    let mut row_odd: u32 = 0;
    let mut row_even: u32 = 0;
    for j in 0..9 {
        let mut acc_odd = 0u8;
        let mut acc_even = 0u8;
        for (n, &byte) in sub.iter().enumerate() {
            let p = byte.count_ones() as u8 & 1;
            if (n >> j) & 1 == 1 {
                acc_odd ^= p;
            } else {
                acc_even ^= p;
            }
        }
        row_odd |= (acc_odd as u32) << j;
        row_even |= (acc_even as u32) << j;
    }

    let mut lane = [0u8; 8];
    for (p, slot) in lane.iter_mut().enumerate() {
        let mut acc = 0u8;
        for &byte in sub.iter() {
            acc ^= (byte >> p) & 1;
        }
        *slot = acc;
    }

    let mut col_odd: u32 = 0;
    let mut col_even: u32 = 0;
    for m in 0..3 {
        let mut acc_odd = 0u8;
        let mut acc_even = 0u8;
        for (p, &lp) in lane.iter().enumerate() {
            if (p >> m) & 1 == 1 {
                acc_odd ^= lp;
            } else {
                acc_even ^= lp;
            }
        }
        col_odd |= (acc_odd as u32) << m;
        col_even |= (acc_even as u32) << m;
    }

    let odd_field = (row_odd << 3) | col_odd;
    let even_field = (row_even << 3) | col_even;
    (odd_field << 16) | even_field
}

fn compute_page_ecc(data: &[u8; PAGE_SIZE]) -> [u8; ECC_SIZE] {
    let mut tag = [0u8; ECC_SIZE];
    for (i, chunk) in data.chunks(SUBPAGE_SIZE).enumerate().take(SUBPAGES_PER_PAGE) {
        let word = encode_subpage_ecc(chunk);
        tag[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    tag
}

#[derive(Clone)]
struct Cell {
    data: [u8; PAGE_SIZE],
    spare: [u8; SPARE_SIZE],
}

/// An in-memory NAND device: sparse page storage, with hooks to inject
/// single-bit data corruption (without touching the stored ECC tag, as a
/// real wear-induced flip would) and to force write/erase failures on
/// specific pages or blocks.
pub struct RamNand {
    pages: BTreeMap<u32, Cell>,
    bank: Bank,
    fail_write_pages: BTreeSet<u32>,
    fail_erase_blocks: BTreeSet<u32>,
}

impl Default for RamNand {
    fn default() -> Self {
        RamNand {
            pages: BTreeMap::new(),
            bank: Bank::Slc,
            fail_write_pages: BTreeSet::new(),
            fail_erase_blocks: BTreeSet::new(),
        }
    }
}

impl RamNand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a page directly, bypassing ECC/bank bookkeeping, for test
    /// fixture setup (e.g. planting a pre-built superblock image).
    pub fn poke_page(&mut self, page: u32, data: [u8; PAGE_SIZE], mut spare: [u8; SPARE_SIZE]) {
        let tag = compute_page_ecc(&data);
        spare[ECC_STOR_OFFSET..ECC_STOR_OFFSET + ECC_SIZE].copy_from_slice(&tag);
        self.pages.insert(page, Cell { data, spare });
    }

    /// Flips a single data bit in an already-written page without
    /// touching its stored ECC tag, simulating wear-induced bit rot
    /// (scenario S1).
    pub fn corrupt_bit(&mut self, page: u32, byte_offset: usize, bit: u8) {
        let cell = self.pages.get_mut(&page).expect("page not written");
        cell.data[byte_offset] ^= 1 << bit;
    }

    /// Flips a bit at `spare_offset` in `page`'s spare area, for
    /// perturbing one of the two on-disk HMAC tag copies (scenario S2).
    pub fn corrupt_hmac_copy(&mut self, page: u32, spare_offset: usize, bit: u8) {
        let cell = self.pages.get_mut(&page).expect("page not written");
        cell.spare[spare_offset] ^= 1 << bit;
    }

    /// Causes every future `write_page` on `page` to fail fatally until
    /// cleared, modelling a block that has gone bad.
    pub fn fail_writes_to(&mut self, page: u32) {
        self.fail_write_pages.insert(page);
    }

    /// Causes `erase_block(block)` to fail fatally.
    pub fn fail_erase(&mut self, block: u32) {
        self.fail_erase_blocks.insert(block);
    }
}

impl NandDevice for RamNand {
    fn select_bank(&mut self, bank: Bank) {
        self.bank = bank;
    }

    fn read_page(
        &mut self,
        page: u32,
        data: &mut [u8; PAGE_SIZE],
        spare: &mut [u8; SPARE_SIZE],
    ) -> Result<ReadGrade, NandError> {
        let cell = self.pages.get(&page).ok_or(NandError)?;
        *data = cell.data;
        *spare = cell.spare;

        let stored = &cell.spare[ECC_STOR_OFFSET..ECC_STOR_OFFSET + ECC_SIZE];
        let computed = compute_page_ecc(data);

        let mut grade = ReadGrade::Ok;
        for i in 0..SUBPAGES_PER_PAGE {
            let stored_word: [u8; 4] = stored[i * 4..i * 4 + 4].try_into().unwrap();
            let computed_word: [u8; 4] = computed[i * 4..i * 4 + 4].try_into().unwrap();
            let mut stored_tag = [0u8; ECC_SIZE];
            let mut computed_tag = [0u8; ECC_SIZE];
            stored_tag[..4].copy_from_slice(&stored_word);
            computed_tag[..4].copy_from_slice(&computed_word);

            match ecc::correct_subpage(
                &mut data[i * SUBPAGE_SIZE..(i + 1) * SUBPAGE_SIZE],
                &stored_tag,
                &computed_tag,
            ) {
                ecc::EccOutcome::Ok => {}
                ecc::EccOutcome::Corrected => grade = ReadGrade::Corrected,
                ecc::EccOutcome::Uncorrectable => return Err(NandError),
            }
        }

        Ok(grade)
    }

    fn write_page(
        &mut self,
        page: u32,
        data: &[u8; PAGE_SIZE],
        spare: &[u8; SPARE_SIZE],
    ) -> Result<(), NandError> {
        if self.fail_write_pages.contains(&page) {
            return Err(NandError);
        }
        self.poke_page(page, *data, *spare);
        Ok(())
    }

    fn erase_block(&mut self, block: u32) -> Result<(), NandError> {
        if self.fail_erase_blocks.contains(&block) {
            return Err(NandError);
        }
        let first = block * BLOCK_PAGES;
        for page in first..first + BLOCK_PAGES {
            self.pages.insert(
                page,
                Cell {
                    data: [0xFFu8; PAGE_SIZE],
                    spare: [0xFFu8; SPARE_SIZE],
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_no_corruption() {
        let mut nand = RamNand::new();
        let data = [0x42u8; PAGE_SIZE];
        let spare = [0u8; SPARE_SIZE];
        nand.write_page(0, &data, &spare).unwrap();

        let mut out_data = [0u8; PAGE_SIZE];
        let mut out_spare = [0u8; SPARE_SIZE];
        let grade = nand.read_page(0, &mut out_data, &mut out_spare).unwrap();
        assert_eq!(grade, ReadGrade::Ok);
        assert_eq!(out_data, data);
    }

    #[test]
    fn single_bit_corruption_is_corrected() {
        let mut nand = RamNand::new();
        let mut data = [0u8; PAGE_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        let spare = [0u8; SPARE_SIZE];
        nand.write_page(3, &data, &spare).unwrap();
        nand.corrupt_bit(3, 100, 0);

        let mut out_data = [0u8; PAGE_SIZE];
        let mut out_spare = [0u8; SPARE_SIZE];
        let grade = nand.read_page(3, &mut out_data, &mut out_spare).unwrap();
        assert_eq!(grade, ReadGrade::Corrected);
        assert_eq!(out_data, data);
    }

    #[test]
    fn write_failure_is_reported() {
        let mut nand = RamNand::new();
        nand.fail_writes_to(5);
        let data = [0u8; PAGE_SIZE];
        let spare = [0u8; SPARE_SIZE];
        assert!(nand.write_page(5, &data, &spare).is_err());
    }
}
