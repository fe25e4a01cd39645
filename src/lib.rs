//! repuff - reversible DEFLATE transcoding for delta pipelines
//!
//! Converts DEFLATE bitstreams into a byte-aligned, canonically-represented
//! "puff" form and losslessly reconstructs the exact original bits from it.
//! Two compressed artifacts that differ only through compression side
//! effects become far more similar in puff form, which is what makes binary
//! deltas across ZIP/gzip/APK payloads practical.
//!
//! The pieces, leaves first:
//!
//! - [`bit_reader`] / [`bit_writer`]: LSB-first bit I/O with precise offsets
//! - [`huffman`]: canonical Huffman tables used for both decode and encode
//! - [`puff_reader`] / [`puff_writer`]: the self-delimiting puff record wire
//! - [`puffer`] / [`huffer`]: the two directions of the transcoder
//! - [`stream`] / [`extent_stream`]: seekable byte streams over memory,
//!   files, and extent-filtered views
//! - [`puff_stream`]: a random-access puff view over a deflate backing, with
//!   lazy transcoding and an LRU cache of puffed extents

pub mod bit_reader;
pub mod bit_writer;
pub mod error;
pub mod extent_stream;
pub mod huffer;
pub mod huffman;
pub mod puff_data;
pub mod puff_reader;
pub mod puff_stream;
pub mod puff_writer;
pub mod puffer;
pub mod stream;

#[cfg(test)]
mod test_utils;

pub use error::{RepuffError, RepuffResult};
pub use extent_stream::ExtentStream;
pub use huffer::Huffer;
pub use puff_data::{BitExtent, ByteExtent, PuffData};
pub use puff_stream::{find_puff_locations, PuffStream};
pub use puffer::Puffer;
pub use stream::{shared_buffer, FileStream, MemoryStream, SharedBuffer, Stream};
