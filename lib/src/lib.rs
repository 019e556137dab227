//! This crate provides a Rust implementation of BGZF2, a block-structured container
//! built on top of Zstandard.
//!
//! A BGZF2 file stores an uncompressed byte stream as an ordered sequence of
//! independently decodable Zstd frames, interleaved with Zstd skippable frames that
//! carry container metadata and indices. Any conforming Zstd decoder ignores the
//! skippable frames and reproduces the original payload, while BGZF2-aware readers
//! additionally get:
//!
//! - random access by uncompressed byte offset through a trailing seek table,
//! - parallel compression and decompression, enabled by a preface frame that
//!   publishes the compressed size of the following data frame,
//! - optional range queries over sorted genomic records through a second trailing
//!   index.
//!
//! # Getting Started
//!
//! - The [`Writer`] compresses data into BGZF2 files.
//! - The [`Reader`] reads, seeks and queries them.
//! - [`Writer::attach_thread_pool`] and [`Reader::attach_thread_pool`] switch either
//!   side to a worker pool with a dedicated I/O thread.
//! - The [`SeekTable`] and [`GenomicIndex`] types give direct access to the trailing
//!   indices.
//!
//! Bgzf2 uses bindings from the [zstd_safe] crate.
//!
//! [zstd_safe]: https://docs.rs/zstd-safe/latest/zstd_safe/

#![cfg_attr(docsrs, feature(doc_cfg))]

mod command;
mod decode;
mod encode;
mod error;
mod frame;
pub mod genomic;
pub mod seek_table;
mod seekable;

pub use decode::{ReadOptions, Reader};
pub use encode::{WriteOptions, Writer};
pub use error::{Error, Result};
pub use frame::EofStatus;
pub use genomic::{GenomicEntry, GenomicIndex};
pub use seek_table::{IndexEntry, SeekPoint, SeekTable};
pub use seekable::{BytesWrapper, OffsetFrom, Seekable};
// Re-export as it's part of the API.
pub use zstd_safe::CompressionLevel;

/// The magic number trailing the seek table, also the EOF marker of a BGZF2 file.
pub const SEEKABLE_MAGIC_NUMBER: u32 = 0x8F92_EAB1;
/// The magic number trailing the genomic index.
pub const GENOMIC_MAGIC_NUMBER: u32 = 0x8F92_EABB;
/// The maximum uncompressed size of a single block.
pub const MAX_BLOCK_SIZE: usize = 0x4000_0000;
/// The default uncompressed block size.
pub const DEFAULT_BLOCK_SIZE: usize = 256_000;
/// The default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: CompressionLevel = 5;
/// The maximum number of entries in a seek table.
pub const SEEKABLE_MAX_ENTRIES: u32 = 0x0800_0000;
/// The size of the seek table footer.
pub const SEEK_TABLE_FOOTER_SIZE: usize = 9;
/// The size of the skippable frame header.
///
/// Skippable magic number (4 bytes) + frame size field (4 bytes)
pub(crate) const SKIPPABLE_HEADER_SIZE: usize = 8;
