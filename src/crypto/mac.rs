//! Cluster-range HMAC-SHA1 authentication (spec.md §4.B), grounded in
//! `hmac_init`/`hmac_update`/`hmac_final` (`examples/original_source/stage2/hmac.c`)
//! and their call sites in `isfs_read_volume`/`isfs_write_volume`
//! (`examples/original_source/stage2/isfs/volume.c`): the tag covers a
//! fixed 64-byte seed followed by the full plaintext of every cluster in
//! the range, and is split into two 20-byte copies stored across the
//! spare bytes of each cluster's 7th and 8th pages.
//!
//! `hmac_init`/`_update`/`_final` is the textbook ipad/opad HMAC
//! construction; `hmac::Hmac<sha1::Sha1>` is the idiomatic RustCrypto
//! equivalent, so there is no reason to hand-roll it here the way the
//! cluster cipher stands in for the (genuinely hardware-only) AES engine.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::geometry::CLUSTER_SIZE;

/// Size in bytes of one HMAC-SHA1 tag.
pub const TAG_SIZE: usize = 20;
/// Size in bytes of the seed prepended to every tag's covered range.
pub const SEED_SIZE: usize = 64;

type HmacSha1 = Hmac<Sha1>;

/// Computes the HMAC-SHA1 tag over `seed || data`, where `data` is
/// `cluster_count * CLUSTER_SIZE` bytes of cluster plaintext.
pub fn compute_tag(key: &[u8], seed: &[u8; SEED_SIZE], data: &[u8]) -> [u8; TAG_SIZE] {
    debug_assert_eq!(data.len() % CLUSTER_SIZE, 0);

    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(seed);
    mac.update(data);
    let result = mac.finalize().into_bytes();

    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&result);
    tag
}

/// Splits a 20-byte tag into the two on-disk copies, as placed in a
/// cluster's page-6 and page-7 spare areas: copy 0 is the full tag in
/// page 6 bytes `1..21`; copy 1 is split as page 6 bytes `21..33` (its
/// first 12 bytes) followed by page 7 bytes `1..9` (its last 8 bytes).
pub struct SplitTag {
    pub page6_copy0: [u8; TAG_SIZE],
    pub page6_copy1_head: [u8; 12],
    pub page7_copy1_tail: [u8; 8],
}

pub fn split_tag(tag: &[u8; TAG_SIZE]) -> SplitTag {
    let mut page6_copy1_head = [0u8; 12];
    page6_copy1_head.copy_from_slice(&tag[..12]);
    let mut page7_copy1_tail = [0u8; 8];
    page7_copy1_tail.copy_from_slice(&tag[12..]);
    SplitTag {
        page6_copy0: *tag,
        page6_copy1_head,
        page7_copy1_tail,
    }
}

/// Reassembles the two on-disk copies from a cluster's page-6 and page-7
/// spare bytes, as read back by `isfs_read_volume`.
pub fn join_copies(page6_copy0: &[u8; TAG_SIZE], page6_copy1_head: &[u8; 12], page7_copy1_tail: &[u8; 8]) -> ([u8; TAG_SIZE], [u8; TAG_SIZE]) {
    let mut copy1 = [0u8; TAG_SIZE];
    copy1[..12].copy_from_slice(page6_copy1_head);
    copy1[12..].copy_from_slice(page7_copy1_tail);
    (*page6_copy0, copy1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_round_trip() {
        let tag: [u8; TAG_SIZE] = core::array::from_fn(|i| i as u8);
        let split = split_tag(&tag);
        let (copy0, copy1) = join_copies(&split.page6_copy0, &split.page6_copy1_head, &split.page7_copy1_tail);
        assert_eq!(copy0, tag);
        assert_eq!(copy1, tag);
    }

    #[test]
    fn tag_changes_with_data() {
        let key = [0x11u8; 20];
        let seed = [0u8; SEED_SIZE];
        let a = vec![0u8; CLUSTER_SIZE];
        let mut b = vec![0u8; CLUSTER_SIZE];
        b[0] = 1;

        let tag_a = compute_tag(&key, &seed, &a);
        let tag_b = compute_tag(&key, &seed, &b);
        assert_ne!(tag_a, tag_b);
    }

    #[test]
    fn tag_is_deterministic() {
        let key = [0x22u8; 20];
        let seed = [0x33u8; SEED_SIZE];
        let data = vec![0x44u8; CLUSTER_SIZE * 2];
        assert_eq!(compute_tag(&key, &seed, &data), compute_tag(&key, &seed, &data));
    }
}
