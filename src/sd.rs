//! The SD-card FAT collaborator (spec.md §1): this crate does not bring
//! up the SD host controller or re-implement a FAT driver, it only
//! consumes one through this trait, mirroring `sdcard_init`/`f_mount`/
//! `f_open`/`f_read`/`f_close`/`f_mount(0, ...)`/`sdcard_exit` in
//! `examples/original_source/stage2/main.c`'s `load_payload_sd`.

/// A mountable FAT volume on removable media. Any failure at any step
/// (mount, open, read) is treated identically by the loader: skip this
/// source and fall back to the next one (spec.md §7's "move to the next
/// fallback"), so this trait reports failures as a unit `()` rather than
/// a detailed error enum.
pub trait SdCard {
    type File: SdFile;

    /// Brings up the host controller and mounts the FAT volume,
    /// mirroring `sdcard_init` + `f_mount(&fatfs, "0:", 1)`.
    fn mount(&mut self) -> Result<(), ()>;

    /// Unmounts and tears the controller back down, mirroring
    /// `f_mount(0, "0:", 0)` + `sdcard_exit`. Called unconditionally once
    /// a `mount` attempt was made, success or not.
    fn unmount(&mut self);

    /// Opens `path` relative to the volume root, mirroring
    /// `f_open(&file, path, FA_READ)`.
    fn open(&mut self, path: &str) -> Result<Self::File, ()>;
}

/// An open file on the SD volume.
pub trait SdFile {
    /// Mirrors `f_size`.
    fn len(&self) -> usize;

    /// Reads the whole file into `buf` (which must be exactly
    /// [`len`](SdFile::len) bytes), mirroring `f_read`'s "short read is
    /// an error" behavior (`res || (btr != br)`).
    fn read_all(&mut self, buf: &mut [u8]) -> Result<(), ()>;
}

#[cfg(any(test, not(feature = "no_std")))]
pub mod test_support {
    use alloc::collections::BTreeMap;
    use alloc::vec::Vec;

    use super::{SdCard, SdFile};

    /// An in-memory SD card double: a flat name→bytes map standing in
    /// for the FAT root directory, and a switch to simulate the card
    /// being altogether absent (mount failure).
    #[derive(Default)]
    pub struct MemSdCard {
        files: BTreeMap<alloc::string::String, Vec<u8>>,
        present: bool,
    }

    impl MemSdCard {
        pub fn new() -> Self {
            MemSdCard {
                files: BTreeMap::new(),
                present: true,
            }
        }

        pub fn absent() -> Self {
            MemSdCard {
                files: BTreeMap::new(),
                present: false,
            }
        }

        pub fn with_file(mut self, name: &str, contents: Vec<u8>) -> Self {
            self.files.insert(alloc::string::String::from(name), contents);
            self
        }
    }

    pub struct MemSdFile {
        contents: Vec<u8>,
    }

    impl SdFile for MemSdFile {
        fn len(&self) -> usize {
            self.contents.len()
        }

        fn read_all(&mut self, buf: &mut [u8]) -> Result<(), ()> {
            if buf.len() != self.contents.len() {
                return Err(());
            }
            buf.copy_from_slice(&self.contents);
            Ok(())
        }
    }

    impl SdCard for MemSdCard {
        type File = MemSdFile;

        fn mount(&mut self) -> Result<(), ()> {
            if self.present {
                Ok(())
            } else {
                Err(())
            }
        }

        fn unmount(&mut self) {}

        fn open(&mut self, path: &str) -> Result<Self::File, ()> {
            self.files.get(path).cloned().map(|contents| MemSdFile { contents }).ok_or(())
        }
    }
}
