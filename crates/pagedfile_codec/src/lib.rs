//! # PagedFile Codec
//!
//! Block compression for pagedfile segments.
//!
//! This crate provides:
//! - The [`BlockCodec`] trait, a pluggable compress/decompress pair
//! - [`Lz4Codec`], an LZ4 block-format codec backed by `lz4_flex`
//! - [`CompressedBlock`], the self-describing on-disk frame of one block
//!
//! ## Frame Format
//!
//! ```text
//! | magic "PB" (2) | codec (1) | block (4) | raw_len (4) | stored_len (4) | crc32 (4) | payload (N) |
//! ```
//!
//! All integers are little-endian. `codec == 0` means the payload is stored
//! uncompressed, which happens whenever compression would not shrink it.
//! The checksum covers the uncompressed bytes.
//!
//! ## Usage
//!
//! ```
//! use pagedfile_codec::{CompressedBlock, Lz4Codec};
//!
//! let codec = Lz4Codec;
//! let data = vec![7u8; 4096];
//!
//! let frame = CompressedBlock::compress(3, &data, &codec).unwrap().encode();
//! let block = CompressedBlock::decode(&frame).unwrap();
//! assert_eq!(block.block, 3);
//! assert_eq!(block.decompress(&codec).unwrap(), data);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod codec;
mod error;

pub use block::{CompressedBlock, FrameHeader, FRAME_HEADER_LEN, FRAME_MAGIC};
pub use codec::{BlockCodec, Lz4Codec, LZ4_CODEC_ID, MAX_BLOCK_LEN, RAW_CODEC_ID};
pub use error::{CodecError, CodecResult};
