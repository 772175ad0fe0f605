//! Cluster encryption (spec.md §4.B), grounded in `isfs_read_volume`'s and
//! `isfs_write_volume`'s `aes_reset`/`aes_empty_iv`/`aes_{en,de}crypt`
//! sequences in `examples/original_source/stage2/isfs/volume.c`: every
//! cluster is CBC-decrypted (or encrypted) in one pass starting from a
//! zero IV. The original drives this a page at a time through a stateful
//! hardware engine and only resets the IV at a cluster's first page
//! (`clusidx > 0` as the "chain" flag); doing the whole cluster in one CBC
//! call is the same transform, since standard CBC chains across however
//! many blocks a single call covers.
//!
//! The hardware AES engine itself is an out-of-scope collaborator
//! (spec.md §1); `aes`/`cbc` are the idiomatic no_std software stand-in.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;

use crate::geometry::CLUSTER_SIZE;

type CbcEnc = cbc::Encryptor<Aes128>;
type CbcDec = cbc::Decryptor<Aes128>;

/// A 128-bit AES key, as stored in the OTP's `nand_key` slot.
pub type AesKey = [u8; 16];

const ZERO_IV: [u8; 16] = [0u8; 16];
const BLOCK_SIZE: usize = 16;

/// Encrypts one cluster's worth of plaintext in place, CBC-chained from a
/// zero IV across the whole cluster.
pub fn encrypt_cluster(key: &AesKey, cluster: &mut [u8; CLUSTER_SIZE]) {
    let mut enc = CbcEnc::new(key.into(), &ZERO_IV.into());
    for block in cluster.chunks_exact_mut(BLOCK_SIZE) {
        enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

/// Decrypts one cluster's worth of ciphertext in place, CBC-chained from a
/// zero IV across the whole cluster.
pub fn decrypt_cluster(key: &AesKey, cluster: &mut [u8; CLUSTER_SIZE]) {
    let mut dec = CbcDec::new(key.into(), &ZERO_IV.into());
    for block in cluster.chunks_exact_mut(BLOCK_SIZE) {
        dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}
