use core::fmt::{self, Debug, Display};

use crate::volume::VolumeError;

/// The set of all possible errors, mirroring the fault taxonomy of
/// spec.md §7: media errors, authentication errors, write-verify errors,
/// structural errors and signed-image errors are distinct variants so
/// callers can match on the kind of failure instead of re-deriving it
/// from a bare negative code the way the original C source did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The NAND media layer reported a fatal (non-ECC-correctable) fault.
    Nand(NandError),
    /// The volume codec returned a fatal result (spec.md §4.C lattice).
    Volume(VolumeError),
    /// No slot in range `[min_generation, max_generation)` parsed with an
    /// acceptable magic, or every candidate slot failed to read back.
    NoValidSuperblock,
    /// isfshax refresh exhausted every redundant slot without a single
    /// successful write (`written == 0`, spec.md §4.D step 5).
    RefreshFailed,
    /// A path did not name a mounted volume.
    UnknownVolume,
    /// A path segment did not resolve to any FST entry.
    NotFound,
    /// An FST entry existed but was not of the node kind the caller
    /// required (e.g. `open()` on a directory).
    WrongNodeKind,
    /// A seek target lies outside `[0, fst.size]`.
    InvalidSeek,
    /// A signed-image envelope failed a check (bad magic, bad signature
    /// type, wrong device target, body-hash mismatch). Per spec.md §4.F
    /// this is never subdivided further: it is always a skip-this-source
    /// signal, never a crash.
    BadSignedImage,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Nand(e) => write!(f, "nand: {}", e),
            Error::Volume(e) => write!(f, "volume: {}", e),
            Error::NoValidSuperblock => write!(f, "no valid superblock found"),
            Error::RefreshFailed => write!(f, "isfshax refresh failed on every slot"),
            Error::UnknownVolume => write!(f, "unknown or unmounted volume"),
            Error::NotFound => write!(f, "path not found"),
            Error::WrongNodeKind => write!(f, "fst entry is not of the expected kind"),
            Error::InvalidSeek => write!(f, "seek target out of range"),
            Error::BadSignedImage => write!(f, "signed image envelope rejected"),
        }
    }
}

#[cfg(any(test, not(feature = "no_std")))]
impl std::error::Error for Error {}

impl From<NandError> for Error {
    fn from(e: NandError) -> Error {
        Error::Nand(e)
    }
}

impl From<VolumeError> for Error {
    fn from(e: VolumeError) -> Error {
        Error::Volume(e)
    }
}

/// Every NAND-layer failure collapses to one fatal code, matching
/// `nand_error()` in the original source: whatever the underlying cause
/// (bad page number, unaligned buffer, command timeout, uncorrectable
/// ECC), the controller is reset and the caller sees one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NandError;

impl Display for NandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal NAND controller error")
    }
}

#[cfg(any(test, not(feature = "no_std")))]
impl std::error::Error for NandError {}
