//! A `genfs`-trait façade over [`VolumeContext`] (spec.md §4.E): the
//! payload loader can be written against `genfs`'s generic
//! `Filesystem`/`File`/`Dir` traits instead of isfs's own method names.
//! This is purely an additional entry point; the walk/seek/read
//! semantics underneath are exactly [`VolumeContext::open`],
//! [`FileHandle::read`] and [`FileHandle::seek`] — `genfs` is read-only
//! here, since ISFS has no write path.

use genfs::{Dir, File, Filesystem};

use crate::error::Error;
use crate::nand::NandDevice;
use crate::sys::fst::FstEntry;

use super::{DirHandle, FileHandle, SeekFrom as IsfsSeekFrom, VolumeContext};

impl<'a, N: NandDevice> Filesystem<'a> for VolumeContext<N> {
    type File = FileHandle<'a, N>;
    type Dir = DirHandle<'a, N>;
    type Error = Error;

    fn open(&'a self, path: &str) -> Result<Self::File, Self::Error> {
        VolumeContext::open(self, path)
    }

    fn open_dir(&'a self, path: &str) -> Result<Self::Dir, Self::Error> {
        VolumeContext::diropen(self, path)
    }
}

impl<'a, N: NandDevice> File for FileHandle<'a, N> {
    type Error = Error;

    fn len(&self) -> u64 {
        // `genfs::File::len` is infallible; an unmounted volume has no
        // length to report, so this degrades to 0 rather than panicking.
        FileHandle::size(self).unwrap_or(0) as u64
    }

    fn seek(&mut self, offset: u64) -> Result<u64, Self::Error> {
        FileHandle::seek(self, IsfsSeekFrom::Start(offset as u32)).map(|n| n as u64)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        FileHandle::read(self, buf)
    }
}

impl<'a, N: NandDevice> Dir for DirHandle<'a, N> {
    type Error = Error;
    type Entry = FstEntry;

    fn next_entry(&mut self) -> Result<Option<Self::Entry>, Self::Error> {
        Ok(DirHandle::read(self))
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        DirHandle::reset(self);
        Ok(())
    }
}
