//! Signed-image ("ancast") envelope verification (spec.md §4.F),
//! transcribed from `ancast_iop_load`
//! (`examples/original_source/stage2/ancast.c`/`.h`).
//!
//! This crate has no memory-mapped load address to execute from (that is
//! the orchestrator's concern, §6), so where the original returns an
//! absolute entry *address*, [`verify`] returns an entry *offset* into
//! the supplied buffer.

use sha1::{Digest, Sha1};

use crate::error::Error;

/// `0xEFA282D9`, big-endian at the start of a signed image (spec.md §6:
/// "32-bit fields big-endian by convention of the platform").
pub const MAGIC: u32 = 0xEFA2_82D9;
/// Signature type a second-stage image must carry.
pub const SIGNATURE_TYPE: u32 = 0x02;
/// Low nibble of [`AncastHeader::device`] identifying an IOP (security
/// co-processor) target image.
pub const TARGET_IOP: u8 = 0x02;

const HEADER_OFFSET: usize = 0x1A0;
const SHA_HASH_WORDS: usize = 5;

/// The fixed-offset header immediately preceding the signed body,
/// mirroring `ancast_header`.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AncastHeader {
    pub unk1: u16,
    pub unk2: u8,
    pub unk3: u8,
    pub device: u32,
    pub ty: u32,
    pub body_size: u32,
    pub body_hash: [u32; SHA_HASH_WORDS],
    pub version: u32,
    pub padding: [u8; 0x38],
}

const _: () = assert!(core::mem::size_of::<AncastHeader>() == 0x60);

impl AncastHeader {
    fn from_bytes(bytes: &[u8; 0x60]) -> AncastHeader {
        let mut body_hash = [0u32; SHA_HASH_WORDS];
        for (i, word) in body_hash.iter_mut().enumerate() {
            *word = u32::from_be_bytes(bytes[16 + i * 4..16 + i * 4 + 4].try_into().unwrap());
        }
        AncastHeader {
            unk1: u16::from_be_bytes(bytes[0..2].try_into().unwrap()),
            unk2: bytes[2],
            unk3: bytes[3],
            device: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
            ty: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
            body_size: u32::from_be_bytes(bytes[12..16].try_into().unwrap()),
            body_hash,
            version: u32::from_be_bytes(bytes[36..40].try_into().unwrap()),
            padding: bytes[40..96].try_into().unwrap(),
        }
    }
}

/// The 16-byte header at the very start of the body, mirroring
/// `ios_header`.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IosHeader {
    pub header_size: u32,
    pub loader_size: u32,
    pub elf_size: u32,
    pub ddr_init: u32,
}

const _: () = assert!(core::mem::size_of::<IosHeader>() == 0x10);

impl IosHeader {
    fn from_bytes(bytes: &[u8; 0x10]) -> IosHeader {
        IosHeader {
            header_size: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            loader_size: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
            elf_size: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
            ddr_init: u32::from_be_bytes(bytes[12..16].try_into().unwrap()),
        }
    }
}

/// A signed image that passed every check in [`verify`]: the header, the
/// body slice it covers, and the offset (within that body) execution
/// should start at.
pub struct Verified<'a> {
    pub header: AncastHeader,
    pub body: &'a [u8],
    pub ios_header: IosHeader,
    pub entry_offset: u32,
}

fn read_be32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4).map(|s| u32::from_be_bytes(s.try_into().unwrap()))
}

/// Verifies `buffer` as a signed IOP image, mirroring `ancast_iop_load`
/// step for step: magic, signature-block type, the fixed-offset header's
/// device-target nibble, then a SHA-1 body-hash compare. Returns the
/// parsed header plus an entry offset on success.
pub fn verify(buffer: &[u8]) -> Result<Verified<'_>, Error> {
    let magic = read_be32(buffer, 0).ok_or(Error::BadSignedImage)?;
    if magic != MAGIC {
        log::warn!("ancast: bad magic {:#010x}", magic);
        return Err(Error::BadSignedImage);
    }

    let sig_offset = read_be32(buffer, 0x08).ok_or(Error::BadSignedImage)? as usize;
    let sig_type = read_be32(buffer, sig_offset).ok_or(Error::BadSignedImage)?;
    if sig_type != SIGNATURE_TYPE {
        log::warn!("ancast: unexpected signature type {:#04x}", sig_type);
        return Err(Error::BadSignedImage);
    }

    let header_bytes: &[u8; 0x60] = buffer
        .get(HEADER_OFFSET..HEADER_OFFSET + 0x60)
        .ok_or(Error::BadSignedImage)?
        .try_into()
        .map_err(|_| Error::BadSignedImage)?;
    let header = AncastHeader::from_bytes(header_bytes);

    let target = (header.device >> 4) as u8;
    if target != TARGET_IOP {
        log::warn!("ancast: not an IOP image (target {:#04x})", target);
        return Err(Error::BadSignedImage);
    }

    let body_start = HEADER_OFFSET + 0x60;
    let body_size = header.body_size as usize;
    let body = buffer.get(body_start..body_start + body_size).ok_or(Error::BadSignedImage)?;

    let mut hasher = Sha1::new();
    hasher.update(body);
    let digest = hasher.finalize();
    let mut computed = [0u32; SHA_HASH_WORDS];
    for (i, word) in computed.iter_mut().enumerate() {
        *word = u32::from_be_bytes(digest[i * 4..i * 4 + 4].try_into().unwrap());
    }
    if computed != header.body_hash {
        log::warn!("ancast: body hash check failed");
        return Err(Error::BadSignedImage);
    }

    let ios_header_bytes: &[u8; 0x10] = body.get(0..0x10).ok_or(Error::BadSignedImage)?.try_into().map_err(|_| Error::BadSignedImage)?;
    let ios_header = IosHeader::from_bytes(ios_header_bytes);

    Ok(Verified {
        header,
        body,
        entry_offset: ios_header.header_size,
        ios_header,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_be32(buf: &mut alloc::vec::Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    fn build_image(body: &[u8], device: u32, corrupt_hash: bool) -> alloc::vec::Vec<u8> {
        let mut hasher = Sha1::new();
        hasher.update(body);
        let digest = hasher.finalize();
        let mut body_hash = [0u32; SHA_HASH_WORDS];
        for (i, word) in body_hash.iter_mut().enumerate() {
            *word = u32::from_be_bytes(digest[i * 4..i * 4 + 4].try_into().unwrap());
        }
        if corrupt_hash {
            body_hash[0] ^= 1;
        }

        let mut buf = alloc::vec::Vec::new();
        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.resize(0x08, 0);
        push_be32(&mut buf, 0x1A0); // sig_offset
        buf.resize(0x1A0, 0);
        push_be32(&mut buf, 0x02); // signature type, at sig_offset

        buf.resize(HEADER_OFFSET, 0);
        buf.extend_from_slice(&0u16.to_be_bytes()); // unk1
        buf.push(0); // unk2
        buf.push(0); // unk3
        push_be32(&mut buf, device);
        push_be32(&mut buf, 0); // type
        push_be32(&mut buf, body.len() as u32);
        for word in body_hash {
            push_be32(&mut buf, word);
        }
        push_be32(&mut buf, 1); // version
        buf.resize(HEADER_OFFSET + 0x60, 0);

        buf.extend_from_slice(body);
        buf
    }

    fn body_with_ios_header(header_size: u32, payload_len: usize) -> alloc::vec::Vec<u8> {
        let mut body = alloc::vec::Vec::new();
        push_be32(&mut body, header_size);
        push_be32(&mut body, 0);
        push_be32(&mut body, 0);
        push_be32(&mut body, 0);
        body.resize(16 + payload_len, 0xCC);
        body
    }

    #[test]
    fn accepts_well_formed_iop_image() {
        let body = body_with_ios_header(0x20, 64);
        let image = build_image(&body, 0x02 << 4, false);

        let verified = verify(&image).unwrap();
        assert_eq!(verified.entry_offset, 0x20);
        assert_eq!(verified.body.len(), body.len());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = build_image(&body_with_ios_header(0x10, 8), 0x02 << 4, false);
        image[0] ^= 0xFF;
        assert_eq!(verify(&image).unwrap_err(), Error::BadSignedImage);
    }

    #[test]
    fn rejects_wrong_device_target() {
        let body = body_with_ios_header(0x10, 8);
        let image = build_image(&body, 0x01 << 4, false);
        assert_eq!(verify(&image).unwrap_err(), Error::BadSignedImage);
    }

    #[test]
    fn rejects_corrupted_body_hash() {
        let body = body_with_ios_header(0x10, 8);
        let image = build_image(&body, 0x02 << 4, true);
        assert_eq!(verify(&image).unwrap_err(), Error::BadSignedImage);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let body = body_with_ios_header(0x10, 8);
        let mut image = build_image(&body, 0x02 << 4, false);
        image.truncate(image.len() - 4);
        assert_eq!(verify(&image).unwrap_err(), Error::BadSignedImage);
    }
}
