//! On-media layout (spec.md §3): the cluster allocation table, the
//! file-system-table record, and the superblock/isfshax-info structures,
//! transcribed from `examples/original_source/stage2/isfs/super.h` and
//! `isfshax.h`.

pub mod fat;
pub mod fst;
pub mod superblock;
