//! Decompression codec contract.
//!
//! The receiver never buffers inside the codec: it hands over the compressed
//! bytes and a fixed-capacity destination and gets back the decompressed
//! length. Failures are per-message and never fatal to the receive loop.

use std::io;

/// Synchronous block decompressor.
pub trait Codec: Send + Sync {
    /// Decompress all of `src` into the front of `dst`, returning the number
    /// of bytes written. Fails if `src` is corrupt or `dst` is too small.
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecError>;

    /// Worst-case compressed size for `uncompressed` input bytes. Used to
    /// size the compressed buffer class of the pool.
    fn max_compressed_len(&self, uncompressed: usize) -> usize;

    fn name(&self) -> &'static str;
}

/// zstd in single-frame block mode.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub const DEFAULT_LEVEL: i32 = 3;

    pub fn new(level: i32) -> Self {
        Self { level }
    }

    /// Compress one chunk the way a rejoin sender does.
    pub fn compress(&self, src: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::bulk::compress(src, self.level).map_err(CodecError::Compress)
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LEVEL)
    }
}

impl Codec for ZstdCodec {
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecError> {
        zstd::bulk::decompress_to_buffer(src, dst).map_err(|e| CodecError::Decompress {
            compressed_len: src.len(),
            capacity: dst.len(),
            source: e,
        })
    }

    fn max_compressed_len(&self, uncompressed: usize) -> usize {
        zstd::zstd_safe::compress_bound(uncompressed)
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decompress {compressed_len} bytes into {capacity}-byte buffer: {source}")]
    Decompress {
        compressed_len: usize,
        capacity: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to compress: {0}")]
    Compress(#[source] io::Error),
}
