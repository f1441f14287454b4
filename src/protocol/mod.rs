//! Protocol module - Defines the wire protocol spoken to the treasure manager
//!
//! Every message in both directions is a fixed 38-byte header:
//! - 2 bytes session command id (little-endian)
//! - 2 bytes command id (little-endian, only meaningful for INVOKE)
//! - 2 bytes parameter type tags (slot 0 in bits 0..4, slot 1 in bits 4..8)
//! - 2 x 16 bytes parameter slots (two little-endian u64 each)
//!
//! Memref payloads follow the header directly on the same stream, with no
//! delimiter: input payloads after the request, output payloads after the
//! response.

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Number of parameter slots carried by every message
pub const NUM_PARAMS: usize = 2;

/// Size in bytes of one encoded parameter slot
pub const PARAM_SIZE: usize = 16;

/// Size of the fixed header, identical for requests and responses:
/// three u16 fields, then the parameter slots (38 bytes)
pub const HEADER_SIZE: usize = 3 * 2 + NUM_PARAMS * PARAM_SIZE;

/// Largest frame the manager accepts (header plus every memref size)
pub const MAX_FRAME_SIZE: usize = 0x2000;

/// Size of the scratch buffer used for session ids and resource names
pub const SCRATCH_SIZE: usize = 256;

/// Length of the public part of a session id
pub const PUBLIC_ID_LEN: usize = 11;

/// Length of the private part of a session id
pub const PRIVATE_ID_LEN: usize = 31;

/// Offset of the private id inside the scratch buffer
pub const PRIVATE_ID_OFFSET: usize = PUBLIC_ID_LEN + 1;

/// Default TCP port of the treasure manager
pub const DEFAULT_PORT: u16 = 12321;

/// Reserved resource name of the aggregate map view
pub const AGGREGATE_NAME: &[u8] = b"x";
