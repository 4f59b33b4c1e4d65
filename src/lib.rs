//! Geyser delivers one bounded message across a lossy datagram channel
//! without retransmission or acknowledgements.
//!
//! The sender splits the payload into fixed-size base columns and emits
//! them together with XOR parities: one parity over every column, then a
//! stream of random combinations whose column-selection masks form a
//! well-mixed code. The receiver runs online Gaussian elimination over
//! GF(2) on whatever subset arrives, in any order, with duplicates, and
//! back-substitutes into the original payload once the basis is complete.

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod chunk;
pub mod error;
pub mod mask;
pub mod pool;
pub mod receiver;
pub mod sender;
mod xor;

pub use crate::chunk::chunk_header::{ChunkHeader, HASH_SIZE, HEADER_SIZE};
pub use crate::chunk::Chunk;
pub use crate::error::Error;
pub use crate::mask::ColumnMask;
pub use crate::pool::ChunkPool;
pub use crate::receiver::{recv_chunk, AddStatus, Receiver};
pub use crate::sender::{Config, PumpStatus, Sender};

/// Maximum number of base columns in one message.
pub const CHUNK_MAX: usize = 512;
/// Data bytes carried by one chunk container.
pub const CHUNK_DATA_MAX: usize = 8192;
/// Cap on the number of random parity rows per message.
pub const MAX_REDUNDANT: usize = 64;
/// Largest well-formed wire datagram.
pub const MAX_DATAGRAM_SIZE: usize = HEADER_SIZE + CHUNK_DATA_MAX;

const _: () = assert!(CHUNK_MAX < u16::MAX as usize);
