//! The payload-loading orchestrator (spec.md §4.F), transcribed from
//! `_main`, `load_payload_sd` and `load_payload_nand`
//! (`examples/original_source/stage2/main.c`).
//!
//! The original's `_main` brings up interrupts and the OTP/crypto unit
//! before this point and tears them back down after; those steps are
//! out of scope here (spec.md §1) and are left to the embedder. What
//! this module owns is the part spec.md actually scopes: refresh
//! isfshax, try SD, fall back to NAND, verify whatever buffer either
//! source produced, and otherwise shut down.

use alloc::vec;

use crate::ancast::{self, Verified};
use crate::error::Error;
use crate::fs::{self, VolumeContext};
use crate::nand::NandDevice;
use crate::power::{PowerController, ShutdownMode};
use crate::sd::{SdCard, SdFile};
use crate::super_mgr::Boot1Info;

/// The NAND path a signed image is expected at, mirroring
/// `load_payload_nand`'s `"slc:/sys/isfshax.bin"`.
pub const NAND_PAYLOAD_PATH: &str = "slc:/sys/isfshax.bin";
/// The SD path a signed image is expected at, mirroring
/// `load_payload_sd`'s `"isfshax.bin"` at the FAT volume root.
pub const SD_PAYLOAD_PATH: &str = "isfshax.bin";

/// An entry point resolved from a verified payload: which buffer it
/// lives in (so the caller knows whose storage to keep alive) and the
/// offset execution should begin at.
pub struct Payload {
    pub buffer: alloc::vec::Vec<u8>,
    pub entry_offset: u32,
}

fn verify_owned(buffer: alloc::vec::Vec<u8>) -> Option<Payload> {
    match ancast::verify(&buffer) {
        Ok(Verified { entry_offset, .. }) => Some(Payload { buffer, entry_offset }),
        Err(err) => {
            log::warn!("loader: signed-image verification failed: {}", err);
            None
        }
    }
}

/// Attempts to read and verify a signed image from the SD card,
/// mirroring `load_payload_sd`: mount, clear any stale destination
/// state (modeled here as simply not reusing a previous attempt's
/// buffer), open, read the whole file, unmount, then hand the bytes to
/// the ancast verifier. Any failure at any step yields `None` rather
/// than propagating, matching the original's "treat as absent and fall
/// through" behavior.
pub fn load_payload_sd<S: SdCard>(sd: &mut S) -> Option<Payload> {
    if sd.mount().is_err() {
        log::warn!("loader: sd card did not mount");
        return None;
    }

    let result = (|| {
        let mut file = sd.open(SD_PAYLOAD_PATH).ok()?;
        let mut buffer = vec![0u8; file.len()];
        file.read_all(&mut buffer).ok()?;
        Some(buffer)
    })();

    sd.unmount();

    result.and_then(verify_owned)
}

/// Attempts to read and verify a signed image from the mounted ISFS
/// NAND volume, mirroring `load_payload_nand`: open, read the whole
/// file, hand it to the ancast verifier. The volume itself is expected
/// to already be mounted (spec.md's NAND volume lifecycle is the
/// embedder's responsibility, same as in the original where
/// `isfs_init` runs once at startup rather than per attempt).
pub fn load_payload_nand<N: NandDevice>(volumes: &[&VolumeContext<N>]) -> Option<Payload> {
    let (ctx, path) = fs::resolve(volumes, NAND_PAYLOAD_PATH).ok()?;
    let mut file = ctx.open(path).ok()?;
    let mut buffer = vec![0u8; file.size().ok()? as usize];
    let n = file.read(&mut buffer).ok()?;
    if n != buffer.len() {
        log::warn!("loader: short read from {}", NAND_PAYLOAD_PATH);
        return None;
    }
    verify_owned(buffer)
}

/// Runs the full startup sequence, mirroring `_main`: refresh isfshax
/// on the system volume, try SD, fall back to NAND, and shut the system
/// down if neither produced a verified payload.
///
/// `system_volume` is the NAND volume isfshax itself lives on (refreshed
/// unconditionally, matching the original calling `isfshax_refresh()`
/// before either load attempt, mount or no mount); `nand_volumes` is the
/// set consulted by [`load_payload_nand`] (almost always the same
/// volume, exposed separately so a caller can model additional mounted
/// banks without requiring this function to assume there is exactly
/// one).
pub fn run<N: NandDevice, S: SdCard, P: PowerController>(
    system_volume: &VolumeContext<N>,
    boot1: &Boot1Info,
    nand_volumes: &[&VolumeContext<N>],
    sd: &mut S,
    power: &mut P,
) -> Option<Payload> {
    if let Err(err) = system_volume.refresh_isfshax(boot1) {
        log::warn!("loader: isfshax refresh failed: {} (continuing boot anyway)", err);
    }

    if let Some(payload) = load_payload_sd(sd) {
        return Some(payload);
    }

    if let Some(payload) = load_payload_nand(nand_volumes) {
        return Some(payload);
    }

    log::warn!("loader: no payload from sd or nand, shutting down");
    power.shutdown(ShutdownMode::PowerOff);
    None
}
