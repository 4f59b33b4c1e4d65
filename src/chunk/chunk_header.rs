use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::mask::{ColumnMask, MASK_WORDS};

/// Bytes of payload digest carried in every header.
pub const HASH_SIZE: usize = 32;

/// Serialized size of a chunk header.
///
/// The declared field order is tightly packed and little-endian on the
/// wire; the total is kept at a multiple of 64 bytes so containers stay
/// cache-line aligned.
pub const HEADER_SIZE: usize = 128;

const _: () = assert!(HEADER_SIZE % 64 == 0);
const _: () = assert!(8 + 16 + HASH_SIZE + 4 + 2 + 2 + MASK_WORDS * 4 == HEADER_SIZE);

/// ChunkHeader prefixes every datagram of a message.
///
/// `(send_timestamp_us, message_id)` identify the message together with the
/// source address; `hash` is the SHA-256 digest of the whole payload;
/// `mask` names the base columns XORed into this chunk's data.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub send_timestamp_us: u64,
    pub message_id: Uuid,
    pub hash: [u8; HASH_SIZE],
    pub message_bytes: u32,
    pub chunk_count: u16,
    pub chunk_bytes: u16,
    pub mask: ColumnMask,
}

/// makes ChunkHeader printable
impl fmt::Display for ChunkHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}B in {} columns, chunk of {}B",
            self.message_id, self.message_bytes, self.chunk_count, self.chunk_bytes
        )
    }
}

impl ChunkHeader {
    pub fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u64_le(self.send_timestamp_us);
        writer.put_slice(self.message_id.as_bytes());
        writer.put_slice(&self.hash);
        writer.put_u32_le(self.message_bytes);
        writer.put_u16_le(self.chunk_count);
        writer.put_u16_le(self.chunk_bytes);
        self.mask.marshal_to(writer);
        Ok(writer.len())
    }

    pub fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(Error::ErrDatagramTooShort);
        }

        let reader = &mut &raw[..];

        let send_timestamp_us = reader.get_u64_le();

        let mut id = [0u8; 16];
        reader.copy_to_slice(&mut id);
        let message_id = Uuid::from_bytes(id);

        let mut hash = [0u8; HASH_SIZE];
        reader.copy_to_slice(&mut hash);

        let message_bytes = reader.get_u32_le();
        let chunk_count = reader.get_u16_le();
        let chunk_bytes = reader.get_u16_le();
        let mask = ColumnMask::unmarshal(reader);

        Ok(ChunkHeader {
            send_timestamp_us,
            message_id,
            hash,
            message_bytes,
            chunk_count,
            chunk_bytes,
            mask,
        })
    }
}
