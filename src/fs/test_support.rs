//! A minimal synthetic volume for `fs`'s own tests: a superblock with a
//! two-entry `/sys` directory committed to slot 0 of an in-memory NAND
//! image, built the same way `super_mgr`'s tests assemble a blank
//! superblock and write it out, extended here with FAT/FST content.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::crypto::mac::TAG_SIZE;
use crate::geometry::{slot_cluster, Bank, CLUSTER_SIZE, SUPER_CLUSTERS, SUPER_SLOT_COUNT};
use crate::nand::ram::RamNand;
use crate::nand::NandDevice;
use crate::sys::fat;
use crate::sys::fst::{FstEntry, FST_NONE};
use crate::sys::superblock::{Superblock, SuperblockHeader, MAGIC_SFS_BANG};
use crate::super_mgr;
use crate::volume::{VolumeFlags, VolumeKeys};

use super::VolumeContext;

const ROOT: u16 = 0;
const SYS_DIR: u16 = 1;
const ISFSHAX_BIN: u16 = 2;
const OTHER_BIN: u16 = 3;

const ISFSHAX_FILE_CLUSTERS: u32 = 2;
const ISFSHAX_FILE_CLUSTER: u32 = 10;
const OTHER_FILE_CLUSTER: u32 = 20;
const OTHER_FILE_SIZE: u32 = 16;

fn keys() -> VolumeKeys {
    VolumeKeys {
        aes_key: *b"0123456789abcdef",
        hmac_key: [0x5Cu8; TAG_SIZE],
    }
}

fn named(name: &[u8]) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[..name.len()].copy_from_slice(name);
    out
}

fn dir_entry(name: &[u8], sub: u16, sib: u16) -> FstEntry {
    FstEntry {
        name: named(name),
        mode: 2,
        attr: 0,
        sub,
        sib,
        size: 0,
        x1: 0,
        uid: 0,
        gid: 0,
        x3: 0,
    }
}

fn file_entry(name: &[u8], sub: u16, sib: u16, size: u32) -> FstEntry {
    FstEntry {
        name: named(name),
        mode: 1,
        attr: 0,
        sub,
        sib,
        size,
        x1: 0,
        uid: 0,
        gid: 0,
        x3: 0,
    }
}

/// Holds the plaintext this fixture wrote, so a test can assert a read
/// back against it without re-deriving the pattern.
pub struct Fixture {
    isfshax_contents: Vec<u8>,
}

impl Fixture {
    pub fn build() -> (Fixture, VolumeContext<RamNand>) {
        let isfshax_size = ISFSHAX_FILE_CLUSTERS * CLUSTER_SIZE as u32;
        let mut isfshax_contents = alloc::vec![0u8; isfshax_size as usize];
        for (i, b) in isfshax_contents.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        Self::build_with_isfshax(isfshax_contents)
    }

    /// Builds the same volume as [`Fixture::build`], but with
    /// `isfshax_contents` (which must be exactly
    /// `ISFSHAX_FILE_CLUSTERS * CLUSTER_SIZE` bytes) as the file's
    /// contents instead of the default pattern -- for tests that need a
    /// real signed image at `/sys/isfshax.bin` rather than filler bytes.
    pub fn build_with_isfshax(isfshax_contents: Vec<u8>) -> (Fixture, VolumeContext<RamNand>) {
        assert_eq!(isfshax_contents.len(), (ISFSHAX_FILE_CLUSTERS * CLUSTER_SIZE as u32) as usize);

        let keys = keys();
        let mut nand = RamNand::new();

        let first_slot_cluster = slot_cluster(0);
        let first_block = first_slot_cluster * crate::geometry::CLUSTER_PAGES / crate::geometry::BLOCK_PAGES;
        for b in first_block..crate::geometry::BLOCK_COUNT {
            nand.erase_block(b).unwrap();
        }
        for c in 0..(ISFSHAX_FILE_CLUSTER + ISFSHAX_FILE_CLUSTERS + 4) {
            let block = c * crate::geometry::CLUSTER_PAGES / crate::geometry::BLOCK_PAGES;
            nand.erase_block(block).unwrap();
        }
        nand.erase_block(OTHER_FILE_CLUSTER * crate::geometry::CLUSTER_PAGES / crate::geometry::BLOCK_PAGES).unwrap();

        let isfshax_size = ISFSHAX_FILE_CLUSTERS * CLUSTER_SIZE as u32;
        let zero_seed = [0u8; crate::crypto::mac::SEED_SIZE];
        crate::volume::write_volume(
            &mut nand,
            Bank::Slc,
            &keys,
            ISFSHAX_FILE_CLUSTER,
            ISFSHAX_FILE_CLUSTERS,
            VolumeFlags::ENCRYPTED,
            &zero_seed,
            &isfshax_contents,
        )
        .unwrap();

        let other_contents = alloc::vec![0xABu8; OTHER_FILE_SIZE as usize];
        let mut other_cluster_buf = alloc::vec![0u8; CLUSTER_SIZE];
        other_cluster_buf[..other_contents.len()].copy_from_slice(&other_contents);
        crate::volume::write_volume(
            &mut nand,
            Bank::Slc,
            &keys,
            OTHER_FILE_CLUSTER,
            1,
            VolumeFlags::ENCRYPTED,
            &zero_seed,
            &other_cluster_buf,
        )
        .unwrap();

        let mut sb = Superblock::zeroed();
        sb.hdr = SuperblockHeader {
            magic: MAGIC_SFS_BANG,
            generation: 1,
            x1: 0,
        };

        for e in sb.fat.iter_mut() {
            *e = fat::EMPTY;
        }
        for i in 0..SUPER_SLOT_COUNT {
            let c = slot_cluster(i);
            for e in &mut sb.fat[c as usize..(c + SUPER_CLUSTERS) as usize] {
                *e = fat::RESERVED;
            }
        }
        sb.fat[ISFSHAX_FILE_CLUSTER as usize] = (ISFSHAX_FILE_CLUSTER + 1) as u16;
        sb.fat[(ISFSHAX_FILE_CLUSTER + 1) as usize] = fat::LAST;
        sb.fat[OTHER_FILE_CLUSTER as usize] = fat::LAST;

        sb.fst[ROOT as usize] = dir_entry(b"", SYS_DIR, FST_NONE);
        sb.fst[SYS_DIR as usize] = dir_entry(b"sys", ISFSHAX_BIN, FST_NONE);
        sb.fst[ISFSHAX_BIN as usize] = file_entry(b"isfshax.bin", ISFSHAX_FILE_CLUSTER as u16, OTHER_BIN, isfshax_size);
        sb.fst[OTHER_BIN as usize] = file_entry(b"other.bin", OTHER_FILE_CLUSTER as u16, FST_NONE, OTHER_FILE_SIZE);

        super_mgr::write_super(&mut nand, Bank::Slc, &keys, SUPER_SLOT_COUNT, 0, &sb).unwrap();

        let ctx = VolumeContext::new("slc", Bank::Slc, nand, keys, SUPER_SLOT_COUNT);

        (Fixture { isfshax_contents }, ctx)
    }

    pub fn isfshax_contents(&self) -> Vec<u8> {
        self.isfshax_contents.clone()
    }

    pub fn sys_children(&self) -> Vec<String> {
        alloc::vec![String::from("isfshax.bin"), String::from("other.bin")]
    }
}
