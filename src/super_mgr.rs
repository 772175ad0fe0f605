//! Superblock manager (spec.md §4.D): slot bookkeeping, generation-range
//! scan and load, classic commit, and the isfshax redundant-slot refresh
//! state machine. Transcribed operation-for-operation from
//! `examples/original_source/stage2/isfs/super.c` and `isfshax.c`.

use alloc::boxed::Box;

use crate::crypto::mac::SEED_SIZE;
use crate::error::Error;
use crate::geometry::{slot_cluster, Bank, SUPER_CLUSTERS};
use crate::nand::NandDevice;
use crate::sys::fat;
use crate::sys::superblock::{super_hmac_seed, IsfshaxInfo, Superblock, ISFSHAX_BAD_SLOT, ISFSHAX_GENERATION_RANGE, ISFSHAX_REDUNDANCY};
use crate::volume::{self, ReadGrade, VolumeError, VolumeFlags, VolumeKeys};

/// Checks whether every FAT entry covering superblock slot `index` (of
/// `slot_count`) is still `RESERVED`, mirroring `isfs_super_check_slot`.
pub fn check_slot(fat: &[u16], slot_count: u32, index: u32) -> bool {
    let cluster = slot_cluster_of(slot_count, index);
    fat[cluster as usize..(cluster + SUPER_CLUSTERS) as usize]
        .iter()
        .all(|&e| e == fat::RESERVED)
}

/// Marks every cluster of superblock slot `index` as `BAD`, mirroring
/// `isfs_super_mark_bad_slot`.
pub fn mark_bad_slot(fat: &mut [u16], slot_count: u32, index: u32) {
    let cluster = slot_cluster_of(slot_count, index);
    for entry in &mut fat[cluster as usize..(cluster + SUPER_CLUSTERS) as usize] {
        *entry = fat::BAD;
    }
}

/// `slot_cluster` is defined in terms of the crate-wide `SUPER_SLOT_COUNT`
/// constant; the original parameterizes it per-context on `super_count`
/// instead. Since this crate only ever mounts the 64-slot SLC layout,
/// `slot_count` is threaded through for fidelity to the original's
/// parameterization but is expected to equal `SUPER_SLOT_COUNT`.
fn slot_cluster_of(slot_count: u32, index: u32) -> u32 {
    let _ = slot_count;
    slot_cluster(index)
}

/// Reads superblock slot `index` into a freshly allocated [`Superblock`],
/// HMAC-verified, mirroring `isfs_read_super`.
pub fn read_super<N: NandDevice>(
    nand: &mut N,
    bank: Bank,
    keys: &VolumeKeys,
    slot_count: u32,
    index: u32,
) -> Result<(Box<Superblock>, ReadGrade), VolumeError> {
    let cluster = slot_cluster_of(slot_count, index);
    let seed = super_hmac_seed(cluster);
    let mut sb = Superblock::zeroed();
    let grade = volume::read_volume(nand, bank, keys, cluster, SUPER_CLUSTERS, VolumeFlags::HMAC, &seed, sb.as_bytes_mut())?;
    Ok((sb, grade))
}

/// Writes `sb` to superblock slot `index`, HMAC-tagged and read back,
/// mirroring `isfs_write_super`.
pub fn write_super<N: NandDevice>(
    nand: &mut N,
    bank: Bank,
    keys: &VolumeKeys,
    slot_count: u32,
    index: u32,
    sb: &Superblock,
) -> Result<(), VolumeError> {
    let cluster = slot_cluster_of(slot_count, index);
    let seed = super_hmac_seed(cluster);
    volume::write_volume(
        nand,
        bank,
        keys,
        cluster,
        SUPER_CLUSTERS,
        VolumeFlags::HMAC | VolumeFlags::READBACK,
        &seed,
        sb.as_bytes(),
    )
}

/// Reads just the first cluster of every slot (unauthenticated, no
/// decrypt) and returns the slot with the newest generation that parses
/// with a recognized magic and falls within `[min_generation,
/// max_generation)`, mirroring `isfs_find_super`.
pub fn find_super<N: NandDevice>(nand: &mut N, bank: Bank, keys: &VolumeKeys, slot_count: u32, min_generation: u32, max_generation: u32) -> Option<(u32, u32, u8)> {
    let mut best: Option<(u32, u32, u8)> = None;
    let zero_seed = [0u8; SEED_SIZE];

    for index in 0..slot_count {
        let cluster = slot_cluster_of(slot_count, index);
        let mut head = alloc::vec![0u8; crate::geometry::CLUSTER_SIZE];
        if volume::read_volume(nand, bank, keys, cluster, 1, VolumeFlags::empty(), &zero_seed, &mut head).is_err() {
            continue;
        }

        let magic: [u8; 4] = head[0..4].try_into().unwrap();
        let version = match magic {
            crate::sys::superblock::MAGIC_SFFS => 0u8,
            crate::sys::superblock::MAGIC_SFS_BANG => 1u8,
            _ => continue,
        };
        let generation = u32::from_le_bytes(head[4..8].try_into().unwrap());

        let worse_than_best = best.map(|(_, g, _)| generation < g).unwrap_or(false);
        if worse_than_best || generation < min_generation || generation >= max_generation {
            continue;
        }

        best = Some((index, generation, version));
    }

    if let Some((index, generation, version)) = best {
        log::debug!("isfs: found super block (version={}, index={}, generation={:#x})", version, index, generation);
    }

    best
}

/// Result of a successful [`load_super`] call.
pub struct LoadedSuper {
    pub superblock: Box<Superblock>,
    pub index: u32,
    pub generation: u32,
    pub version: u8,
}

/// Repeatedly narrows the upper generation bound and retries until a
/// slot both parses (via [`find_super`]) and fully reads back (via
/// [`read_super`]), mirroring `isfs_load_super`'s retry loop: every
/// failed `read_super` lowers the exclusive upper bound to the
/// generation just found, so the next `find_super` call skips it and any
/// other slot sharing that generation.
pub fn load_super<N: NandDevice>(nand: &mut N, bank: Bank, keys: &VolumeKeys, slot_count: u32, min_generation: u32, max_generation: u32) -> Result<LoadedSuper, Error> {
    let mut upper = max_generation;

    loop {
        let (index, generation, version) = match find_super(nand, bank, keys, slot_count, min_generation, upper) {
            Some(found) => found,
            None => return Err(Error::NoValidSuperblock),
        };

        match read_super(nand, bank, keys, slot_count, index) {
            Ok((sb, _grade)) => {
                return Ok(LoadedSuper {
                    superblock: sb,
                    index,
                    generation,
                    version,
                })
            }
            Err(_) => {
                upper = generation;
                continue;
            }
        }
    }
}

/// Bumps the header generation and writes `sb` to the next non-bad slot
/// after `from_index` (classic power-of-two rotation), mirroring
/// `isfs_commit_super`. On a write failure the slot is marked bad and the
/// generation is bumped again before trying the next one. `slot_count`
/// must be a power of two.
pub fn commit_super<N: NandDevice>(nand: &mut N, bank: Bank, keys: &VolumeKeys, slot_count: u32, from_index: u32, sb: &mut Superblock) -> Result<(), Error> {
    sb.hdr.generation += 1;

    for i in 1..=slot_count {
        let index = (from_index + i) & (slot_count - 1);

        if !check_slot(&sb.fat, slot_count, index) {
            continue;
        }

        if write_super(nand, bank, keys, slot_count, index, sb).is_ok() {
            return Ok(());
        }

        mark_bad_slot(&mut sb.fat, slot_count, index);
        sb.hdr.generation += 1;
    }

    Err(Error::NoValidSuperblock)
}

/// The isfshax-resident snapshot a prior-stage loader leaves behind: the
/// live superblock's generation, and the `IsfshaxInfo` describing the four
/// redundant slots. Mirrors the `boot1_superblock` pointer in
/// `isfshax.c`, minus the parts of `isfshax_super` this crate never reads
/// directly (the FAT/FST are re-read fresh from whichever slot is found).
pub struct Boot1Info {
    pub generation: u32,
    pub isfshax: IsfshaxInfo,
}

/// Re-installs the isfshax superblock to the next redundant slot,
/// bumping (or, on generation-range rollover, resetting) the generation
/// number, transcribed operation-for-operation from `isfshax_refresh`.
///
/// Returns `Ok(())` both when the system is healthy (`boot1.generation ==
/// boot1.isfshax.generation`, nothing written) and when at least one slot
/// was successfully rewritten; `Err(RefreshFailed)` if the system was
/// unhealthy and every slot attempt failed.
pub fn isfshax_refresh<N: NandDevice>(nand: &mut N, bank: Bank, keys: &VolumeKeys, slot_count: u32, boot1: &Boot1Info) -> Result<(), Error> {
    if boot1.generation == boot1.isfshax.generation {
        return Ok(());
    }

    let mut curindex = boot1.isfshax.index as usize % ISFSHAX_REDUNDANCY;
    let mut superblock = None;

    for offs in 0..ISFSHAX_REDUNDANCY {
        let index = (curindex + offs) & (ISFSHAX_REDUNDANCY - 1);
        let slot = boot1.isfshax.slot_number(index);

        if let Ok((sb, _grade)) = read_super(nand, bank, keys, slot_count, slot) {
            curindex = index;
            superblock = Some(sb);
            break;
        }
    }

    let mut sb = match superblock {
        Some(sb) => sb,
        None => return Err(Error::NoValidSuperblock),
    };

    let mut generation = sb.hdr.generation + 1;
    let mut count = 1u32;
    let mut info = sb.isfshax_info();

    if generation >= info.generationbase + ISFSHAX_GENERATION_RANGE {
        generation = info.generationbase;
        count = ISFSHAX_REDUNDANCY as u32;
    }

    let mut written = 0u32;
    let mut offs = 1usize;

    while offs <= ISFSHAX_REDUNDANCY && written < count {
        let index = (curindex + offs) & (ISFSHAX_REDUNDANCY - 1);
        let slot = info.slot_number(index);

        if info.slot_is_bad(index) {
            offs += 1;
            continue;
        }

        if index == curindex && written == 0 {
            offs += 1;
            continue;
        }

        info.index = index as u32;
        info.generation = generation;
        sb.set_isfshax_info(info);
        sb.hdr.generation = generation;

        if write_super(nand, bank, keys, slot_count, slot, &sb).is_ok() {
            generation += 1;
            written += 1;
            offs += 1;
            continue;
        }

        info.slots[index] |= ISFSHAX_BAD_SLOT;
        info.generationbase += ISFSHAX_GENERATION_RANGE;
        generation = info.generationbase;
        sb.set_isfshax_info(info);

        if index == curindex {
            offs = 1;
            written = 0;
        }
        offs += 1;
    }

    if written == 0 {
        log::warn!("isfshax: refresh failed on every redundant slot");
        return Err(Error::RefreshFailed);
    }

    Ok(())
}
