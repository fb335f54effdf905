//! Rejoin wire format — site identifiers and the data-chunk message.
//!
//! A rejoin data message carries one compressed snapshot chunk from a
//! source site to a target site. On a byte stream it is framed as a fixed
//! 24-byte header followed by `length` compressed bytes:
//!
//!   [source_hsid u64][target_hsid u64][length u32][version u8][reserved 3]
//!
//! All integers are little-endian. The header uses zerocopy byte-order
//! wrappers, so parsing is allocation-free and there is no unsafe code here.

use std::fmt;

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Host/site identifier. Low 32 bits are the host id, high 32 bits the site id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HsId(pub u64);

impl HsId {
    pub fn new(host_id: u32, site_id: u32) -> Self {
        Self(((site_id as u64) << 32) | host_id as u64)
    }

    pub fn host_id(self) -> u32 {
        self.0 as u32
    }

    pub fn site_id(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for HsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_id(), self.site_id())
    }
}

impl From<u64> for HsId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// The (source, target) pair one logical sub-transfer is tracked under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamPair {
    pub source: HsId,
    pub target: HsId,
}

impl StreamPair {
    pub fn new(source: HsId, target: HsId) -> Self {
        Self { source, target }
    }
}

impl fmt::Display for StreamPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=>{}", self.source, self.target)
    }
}

// ── Data message ─────────────────────────────────────────────────────────────

/// One compressed snapshot chunk as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejoinDataMessage {
    pub source: HsId,
    pub target: HsId,
    /// Compressed chunk bytes, exactly as the sender produced them.
    pub data: Bytes,
}

impl RejoinDataMessage {
    pub fn new(source: HsId, target: HsId, data: impl Into<Bytes>) -> Self {
        Self {
            source,
            target,
            data: data.into(),
        }
    }

    pub fn pair(&self) -> StreamPair {
        StreamPair::new(self.source, self.target)
    }

    /// Frame this message for a byte stream: header followed by payload.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.data.len() > MAX_MESSAGE_PAYLOAD {
            return Err(WireError::PayloadTooLarge(self.data.len()));
        }
        let header = DataMessageHeader::new(self.source, self.target, self.data.len() as u32);
        let mut out = Vec::with_capacity(DATA_HEADER_LEN + self.data.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }
}

/// Fixed header preceding every framed data message.
///
/// Wire size: 24 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct DataMessageHeader {
    pub source_hsid: U64<LittleEndian>,
    pub target_hsid: U64<LittleEndian>,
    /// Compressed payload length, not including this header.
    pub length: U32<LittleEndian>,
    /// Currently 0x01. Unknown versions are rejected.
    pub version: u8,
    /// Must be zero.
    pub reserved: [u8; 3],
}

assert_eq_size!(DataMessageHeader, [u8; DATA_HEADER_LEN]);

impl DataMessageHeader {
    pub fn new(source: HsId, target: HsId, length: u32) -> Self {
        Self {
            source_hsid: U64::new(source.0),
            target_hsid: U64::new(target.0),
            length: U32::new(length),
            version: DATA_MESSAGE_VERSION,
            reserved: [0; 3],
        }
    }

    /// Parse and validate a header from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let header =
            Self::read_from_prefix(bytes).ok_or(WireError::Truncated(bytes.len()))?;
        if header.version != DATA_MESSAGE_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        if header.reserved != [0; 3] {
            return Err(WireError::ReservedBytesSet);
        }
        let length = header.payload_len();
        if length > MAX_MESSAGE_PAYLOAD {
            return Err(WireError::PayloadTooLarge(length));
        }
        Ok(header)
    }

    pub fn source(&self) -> HsId {
        HsId(self.source_hsid.get())
    }

    pub fn target(&self) -> HsId {
        HsId(self.target_hsid.get())
    }

    pub fn payload_len(&self) -> usize {
        self.length.get() as usize
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

pub const DATA_HEADER_LEN: usize = 24;

/// Current data message framing version.
pub const DATA_MESSAGE_VERSION: u8 = 0x01;

/// Largest compressed payload a single framed message may carry.
pub const MAX_MESSAGE_PAYLOAD: usize = 16 * 1024 * 1024;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("header truncated: {0} bytes, need {}", DATA_HEADER_LEN)]
    Truncated(usize),

    #[error("unknown data message version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("payload length {0} exceeds maximum {}", MAX_MESSAGE_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("reserved header bytes are non-zero")]
    ReservedBytesSet,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
