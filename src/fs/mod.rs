//! The mounted filesystem surface (spec.md §4.E): volume mount/unmount,
//! path lookup through the file-system table, directory iteration, and
//! FAT-chain file reads, transcribed from `isfs_init`/`isfs_fini`,
//! `isfs_find_fst`, `isfs_open`/`isfs_seek`/`isfs_read` and
//! `isfs_diropen`/`isfs_dirread`/`isfs_dirreset`/`isfs_dirclose`
//! (`examples/original_source/stage2/isfs/{isfs,super}.c`).

use alloc::boxed::Box;
use core::cmp::min;

use spin::Mutex;

use crate::error::Error;
use crate::geometry::{Bank, CLUSTER_SIZE};
use crate::nand::NandDevice;
use crate::sys::fat;
use crate::sys::fst::{FstEntry, NodeKind, FST_NONE};
use crate::sys::superblock::{Superblock, ISFSHAX_GENERATION_FIRST};
use crate::volume::{self, VolumeFlags, VolumeKeys};
use crate::{super_mgr, Error as CrateError};

pub mod genfs_impl;
#[cfg(test)]
pub mod test_support;

/// Where a file seek offset is measured from, mirroring `isfs_seek`'s
/// `whence` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u32),
    Current(i64),
    End(i64),
}

struct VolumeInner<N: NandDevice> {
    nand: N,
    superblock: Option<Box<Superblock>>,
    mounted: bool,
}

/// A mounted ISFS volume: the NAND device, key material, and the
/// currently loaded superblock, mirroring `isfs_ctx`. The mutable state
/// is held behind a single lock so a read or seek acquires it only for
/// its own duration (spec.md §5).
pub struct VolumeContext<N: NandDevice> {
    pub name: &'static str,
    bank: Bank,
    keys: VolumeKeys,
    pub slot_count: u32,
    inner: Mutex<VolumeInner<N>>,
}

impl<N: NandDevice> VolumeContext<N> {
    pub fn new(name: &'static str, bank: Bank, nand: N, keys: VolumeKeys, slot_count: u32) -> Self {
        VolumeContext {
            name,
            bank,
            keys,
            slot_count,
            inner: Mutex::new(VolumeInner {
                nand,
                superblock: None,
                mounted: false,
            }),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.lock().mounted
    }

    /// Loads the newest valid superblock in the full isfshax generation
    /// window, mirroring `isfs_init`'s
    /// `isfs_load_super(ctx, 0, ISFSHAX_GENERATION_FIRST)`.
    pub fn mount(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let loaded = super_mgr::load_super(&mut inner.nand, self.bank, &self.keys, self.slot_count, 0, ISFSHAX_GENERATION_FIRST)?;
        inner.superblock = Some(loaded.superblock);
        inner.mounted = true;
        Ok(())
    }

    /// Discards the in-memory superblock, mirroring `isfs_fini`.
    pub fn unmount(&self) {
        let mut inner = self.inner.lock();
        inner.superblock = None;
        inner.mounted = false;
    }

    /// Runs the isfshax wear-level refresh against this volume's NAND,
    /// mirroring the orchestrator's unconditional `isfshax_refresh()`
    /// call at startup, before any volume is mounted.
    pub fn refresh_isfshax(&self, boot1: &super_mgr::Boot1Info) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        super_mgr::isfshax_refresh(&mut inner.nand, self.bank, &self.keys, self.slot_count, boot1)
    }

    fn locate(&self, path: &str) -> Result<(u16, FstEntry), Error> {
        let inner = self.inner.lock();
        let sb = inner.superblock.as_ref().ok_or(Error::UnknownVolume)?;
        let idx = find_fst(&sb.fst, 0, path.as_bytes()).ok_or(Error::NotFound)?;
        Ok((idx, sb.fst[idx as usize]))
    }

    /// Looks up `path` (already volume-relative, leading `/`), mirroring
    /// `isfs_stat`.
    pub fn stat(&self, path: &str) -> Result<FstEntry, Error> {
        self.locate(path).map(|(_, entry)| entry)
    }

    /// Opens `path` as a file, mirroring `isfs_open`.
    pub fn open(&self, path: &str) -> Result<FileHandle<'_, N>, Error> {
        let (idx, entry) = self.locate(path)?;
        if !entry.is_file() {
            return Err(Error::WrongNodeKind);
        }
        Ok(FileHandle {
            ctx: self,
            fst_index: idx,
            offset: 0,
            cluster: entry.sub,
        })
    }

    /// Opens `path` as a directory, mirroring `isfs_diropen`.
    pub fn diropen(&self, path: &str) -> Result<DirHandle<'_, N>, Error> {
        let (idx, entry) = self.locate(path)?;
        if !entry.is_dir() {
            return Err(Error::WrongNodeKind);
        }
        let child = if entry.sub == FST_NONE { None } else { Some(entry.sub) };
        Ok(DirHandle { ctx: self, dir_index: idx, child })
    }
}

/// Splits `"<volume>:/a/b/c"` into `("<volume>", "/a/b/c")`, mirroring
/// `isfs_do_volume`'s path-prefix parse. The remaining path keeps its
/// leading `/`, which the FST walk relies on to recurse into the root's
/// children on the first call.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let colon = path.find(':')?;
    let (name, rest) = path.split_at(colon);
    let rest = &rest[1..];
    if !rest.starts_with('/') {
        return None;
    }
    Some((name, rest))
}

/// Resolves `path`'s volume prefix against `volumes`, returning the
/// matching mounted context and the volume-relative remainder, mirroring
/// `isfs_do_volume`'s full behavior (including rejecting an unmounted
/// match).
pub fn resolve<'v, 'p, N: NandDevice>(volumes: &[&'v VolumeContext<N>], path: &'p str) -> Result<(&'v VolumeContext<N>, &'p str), CrateError> {
    let (name, rest) = split_path(path).ok_or(Error::UnknownVolume)?;
    let ctx = volumes.iter().copied().find(|v| v.name == name).ok_or(Error::UnknownVolume)?;
    if !ctx.is_mounted() {
        return Err(Error::UnknownVolume);
    }
    Ok((ctx, rest))
}

/// Recursively searches the sibling chain starting at `index`, falling
/// back to testing `index` itself against `path`, mirroring
/// `isfs_find_fst`.
fn find_fst(fst_table: &[FstEntry], index: u16, path: &[u8]) -> Option<u16> {
    let entry = fst_table[index as usize];

    if entry.sib != FST_NONE {
        if let Some(found) = find_fst(fst_table, entry.sib, path) {
            return Some(found);
        }
    }

    match entry.kind() {
        NodeKind::File => {
            if entry.name_str().as_bytes() == path {
                Some(index)
            } else {
                None
            }
        }
        NodeKind::Directory => check_dir(fst_table, index, path),
        NodeKind::Unknown(mode) => {
            log::warn!("isfs: fst entry {} has unknown mode {}", index, mode);
            None
        }
    }
}

fn check_dir(fst_table: &[FstEntry], index: u16, path: &[u8]) -> Option<u16> {
    let entry = fst_table[index as usize];

    let slash = path.iter().position(|&b| b == b'/');
    let seg_len = slash.unwrap_or(path.len());
    if seg_len > entry.name.len() {
        return None;
    }

    let seg = &path[..seg_len];
    if seg_len != 0 && seg != entry.name_str().as_bytes() {
        return None;
    }

    if entry.sub != FST_NONE {
        if let Some(slash) = slash {
            let mut remaining = &path[slash..];
            if remaining.len() > 1 {
                while remaining.first() == Some(&b'/') {
                    remaining = &remaining[1..];
                }
                if !remaining.is_empty() {
                    return find_fst(fst_table, entry.sub, remaining);
                }
            }
        }
    }

    Some(index)
}

/// An open file: an FST entry plus a byte offset and the cluster
/// currently positioned at that offset, mirroring `isfs_file`.
pub struct FileHandle<'a, N: NandDevice> {
    ctx: &'a VolumeContext<N>,
    fst_index: u16,
    offset: u32,
    cluster: u16,
}

impl<'a, N: NandDevice> FileHandle<'a, N> {
    pub fn size(&self) -> Result<u32, Error> {
        let inner = self.ctx.inner.lock();
        let sb = inner.superblock.as_ref().ok_or(Error::UnknownVolume)?;
        Ok(sb.fst[self.fst_index as usize].size)
    }

    /// Repositions the read cursor, replaying the FAT chain from
    /// `fst.sub` one link per full cluster already consumed, mirroring
    /// `isfs_seek`.
    ///
    /// Unlike the original's `while(size > CLUSTER_SIZE)` (strict
    /// greater-than), this walks while `size >= CLUSTER_SIZE`: the
    /// original only advances `file->cluster` past a cluster boundary
    /// when it's reached incrementally through `isfs_read`'s own
    /// lazy-advance, so a direct seek to an exact cluster boundary left
    /// `file->cluster` one step short of where a subsequent read expects
    /// it. Walking on `>=` keeps seek self-consistent with read at every
    /// offset, including exact multiples of `CLUSTER_SIZE`.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u32, Error> {
        let inner = self.ctx.inner.lock();
        let sb = inner.superblock.as_ref().ok_or(Error::UnknownVolume)?;
        let entry = sb.fst[self.fst_index as usize];
        let size = entry.size as i64;

        let target = match pos {
            SeekFrom::Start(off) => off as i64,
            SeekFrom::Current(delta) => self.offset as i64 + delta,
            SeekFrom::End(delta) => size + delta,
        };
        if target < 0 || target > size {
            return Err(Error::InvalidSeek);
        }
        let target = target as u32;

        let clusters = target / CLUSTER_SIZE as u32;
        let cluster = fat::walk(&sb.fat, entry.sub, clusters).ok_or(Error::InvalidSeek)?;

        drop(inner);
        self.offset = target;
        self.cluster = cluster;
        Ok(target)
    }

    /// Reads up to `buf.len()` bytes (clamped to the file's remaining
    /// size), advancing the FAT chain and decrypting each cluster it
    /// draws from, mirroring `isfs_read`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut inner = self.ctx.inner.lock();
        let VolumeInner { nand, superblock, .. } = &mut *inner;
        let sb = superblock.as_ref().ok_or(Error::UnknownVolume)?;
        let entry = sb.fst[self.fst_index as usize];
        let fat_table = &sb.fat;

        let mut want = buf.len() as u64;
        let remaining_in_file = entry.size as u64 - self.offset as u64;
        if want > remaining_in_file {
            want = remaining_in_file;
        }
        let want = want as usize;

        let mut done = 0usize;
        let mut cluster = self.cluster;
        let zero_seed = [0u8; crate::crypto::mac::SEED_SIZE];
        let mut cluster_buf = alloc::vec![0u8; CLUSTER_SIZE];

        while done < want {
            let pos = self.offset as usize % CLUSTER_SIZE;
            let copy = min(CLUSTER_SIZE - pos, want - done);

            volume::read_volume(nand, self.ctx.bank, &self.ctx.keys, cluster as u32, 1, VolumeFlags::ENCRYPTED, &zero_seed, &mut cluster_buf)?;
            buf[done..done + copy].copy_from_slice(&cluster_buf[pos..pos + copy]);

            done += copy;
            self.offset += copy as u32;

            if pos + copy >= CLUSTER_SIZE {
                cluster = fat_table[cluster as usize];
            }
        }

        self.cluster = cluster;
        Ok(done)
    }

    pub fn close(self) {}
}

/// An open directory iterator over one directory's child chain,
/// mirroring `isfs_dir`.
pub struct DirHandle<'a, N: NandDevice> {
    ctx: &'a VolumeContext<N>,
    dir_index: u16,
    child: Option<u16>,
}

impl<'a, N: NandDevice> DirHandle<'a, N> {
    /// Returns the next child entry and advances, mirroring
    /// `isfs_dirread`.
    pub fn read(&mut self) -> Option<FstEntry> {
        let inner = self.ctx.inner.lock();
        let sb = inner.superblock.as_ref()?;
        let idx = self.child?;
        let entry = sb.fst[idx as usize];
        self.child = if entry.sib == FST_NONE { None } else { Some(entry.sib) };
        Some(entry)
    }

    /// Rewinds to the directory's first child, mirroring
    /// `isfs_dirreset`.
    pub fn reset(&mut self) {
        let inner = self.ctx.inner.lock();
        if let Some(sb) = inner.superblock.as_ref() {
            let dir = sb.fst[self.dir_index as usize];
            self.child = if dir.sub == FST_NONE { None } else { Some(dir.sub) };
        }
    }

    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::test_support::Fixture;
    use crate::nand::ram::RamNand;

    fn mounted() -> (Fixture, VolumeContext<RamNand>) {
        let (fixture, ctx) = Fixture::build();
        ctx.mount().unwrap();
        (fixture, ctx)
    }

    #[test]
    fn split_path_keeps_leading_slash() {
        assert_eq!(split_path("slc:/sys/isfshax.bin"), Some(("slc", "/sys/isfshax.bin")));
        assert_eq!(split_path("slc:sys"), None);
        assert_eq!(split_path("noColon"), None);
    }

    #[test]
    fn stat_finds_nested_file() {
        let (_fixture, ctx) = mounted();
        let entry = ctx.stat("/sys/isfshax.bin").unwrap();
        assert_eq!(entry.name_str(), "isfshax.bin");
        assert!(entry.is_file());
    }

    #[test]
    fn stat_finds_bare_directory() {
        let (_fixture, ctx) = mounted();
        let entry = ctx.stat("/sys").unwrap();
        assert!(entry.is_dir());
    }

    #[test]
    fn stat_missing_path_is_not_found() {
        let (_fixture, ctx) = mounted();
        assert_eq!(ctx.stat("/nope.bin").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn open_read_whole_file_round_trips() {
        let (fixture, ctx) = mounted();
        let mut file = ctx.open("/sys/isfshax.bin").unwrap();
        let mut buf = alloc::vec![0u8; file.size().unwrap() as usize];
        let n = file.read(&mut buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(buf, fixture.isfshax_contents());
    }

    #[test]
    fn seek_then_read_matches_whole_file_slice() {
        let (fixture, ctx) = mounted();
        let whole = fixture.isfshax_contents();
        let mut file = ctx.open("/sys/isfshax.bin").unwrap();

        let offset = CLUSTER_SIZE as u32;
        file.seek(SeekFrom::Start(offset)).unwrap();
        let mut buf = alloc::vec![0u8; 64];
        file.read(&mut buf).unwrap();

        assert_eq!(buf, whole[offset as usize..offset as usize + 64]);
    }

    #[test]
    fn diropen_lists_children_in_order() {
        let (fixture, ctx) = mounted();
        let mut dir = ctx.diropen("/sys").unwrap();
        let mut names = alloc::vec::Vec::new();
        while let Some(entry) = dir.read() {
            names.push(alloc::string::String::from(entry.name_str()));
        }
        assert_eq!(names, fixture.sys_children());
    }

    #[test]
    fn dirreset_rewinds_iteration() {
        let (_fixture, ctx) = mounted();
        let mut dir = ctx.diropen("/sys").unwrap();
        let first_pass_count = core::iter::from_fn(|| dir.read()).count();
        dir.reset();
        let second_pass_count = core::iter::from_fn(|| dir.read()).count();
        assert_eq!(first_pass_count, second_pass_count);
    }

    #[test]
    fn resolve_routes_by_volume_name() {
        let (_fixture, ctx) = mounted();
        let volumes = [&ctx];
        let (resolved, rest) = resolve(&volumes, "slc:/sys/isfshax.bin").unwrap();
        assert_eq!(resolved.name, "slc");
        assert_eq!(rest, "/sys/isfshax.bin");
    }

    #[test]
    fn resolve_rejects_unmounted_volume() {
        let (_fixture, ctx) = Fixture::build();
        let volumes = [&ctx];
        assert_eq!(resolve(&volumes, "slc:/sys/isfshax.bin").unwrap_err(), CrateError::UnknownVolume);
    }
}
