//! Shared types, wire format, codec contract and configuration
//! for the rejoin snapshot receiver. All other rejoin crates depend on this one.

pub mod codec;
pub mod config;
pub mod wire;

pub use codec::{Codec, CodecError, ZstdCodec};
pub use wire::{HsId, RejoinDataMessage, StreamPair};
