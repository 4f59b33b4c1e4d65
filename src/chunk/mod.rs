#[cfg(test)]
mod chunk_test;

pub mod chunk_header;

use bytes::{Bytes, BytesMut};

use chunk_header::*;

use crate::error::{Error, Result};
use crate::{CHUNK_DATA_MAX, CHUNK_MAX};

/// Chunk is a pool-owned container for one wire datagram: a header plus a
/// fixed data buffer of CHUNK_DATA_MAX bytes.
///
/// Only the first `header.chunk_bytes` data bytes are meaningful; the rest
/// are kept zero so parity arithmetic treats the short last column as
/// zero-extended. Containers travel by `Box` so ownership transfers are
/// pointer moves, never 8 KiB copies.
#[derive(Clone)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub(crate) data: [u8; CHUNK_DATA_MAX],
}

impl Default for Chunk {
    fn default() -> Self {
        Chunk {
            header: ChunkHeader::default(),
            data: [0u8; CHUNK_DATA_MAX],
        }
    }
}

impl Chunk {
    /// A fresh zeroed container on the heap.
    pub fn boxed() -> Box<Chunk> {
        Box::new(Chunk::default())
    }

    /// The valid data bytes carried by this chunk.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.header.chunk_bytes)]
    }

    /// Rezero the whole container, header included.
    pub fn clear(&mut self) {
        self.header = ChunkHeader::default();
        self.data = [0u8; CHUNK_DATA_MAX];
    }

    pub fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header.marshal_to(writer)?;
        writer.extend_from_slice(self.payload());
        Ok(writer.len())
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + usize::from(self.header.chunk_bytes));
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse and validate one received datagram into this container.
    ///
    /// Rejects, with a distinct error each, datagrams whose observed size
    /// disagrees with the header, and headers whose size fields are
    /// mutually impossible. The mask is stored without inspection. On
    /// success the data tail past `chunk_bytes` is zero-filled.
    pub fn unmarshal_datagram(&mut self, raw: &[u8]) -> Result<()> {
        let header = ChunkHeader::unmarshal(raw)?;

        if raw.len() != HEADER_SIZE + usize::from(header.chunk_bytes) {
            return Err(Error::ErrDatagramSizeMismatch);
        }

        let data_bytes = raw.len() - HEADER_SIZE;
        if (header.message_bytes as usize) < data_bytes {
            return Err(Error::ErrMessageSmallerThanChunk);
        }

        if header.chunk_count == 0 || usize::from(header.chunk_count) > CHUNK_MAX {
            return Err(Error::ErrChunkCountOutOfRange);
        }

        let full_columns = (usize::from(header.chunk_count) - 1) * CHUNK_DATA_MAX;
        if header.message_bytes as usize <= full_columns {
            return Err(Error::ErrMessageTooSmallForCount);
        }

        if header.message_bytes as usize > full_columns + data_bytes {
            return Err(Error::ErrMessageTooLargeForCount);
        }

        self.header = header;
        self.data[..data_bytes].copy_from_slice(&raw[HEADER_SIZE..]);
        self.data[data_bytes..].fill(0);
        Ok(())
    }
}
