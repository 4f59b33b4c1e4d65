
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, trace};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use util::Conn;

use crate::chunk::chunk_header::HASH_SIZE;
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::xor::block_xor;
use crate::{CHUNK_DATA_MAX, MAX_DATAGRAM_SIZE};

/// `chunk_received` value once back-substitution has run.
const BACKSOLVED: u16 = u16::MAX;

/// Outcome of offering a chunk to a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStatus {
    /// Rank is complete; the message can be extracted.
    Ready,
    /// This many additional independent chunks are still required.
    Needed(u16),
}

/// What became of a chunk at one pivot slot.
enum RowOutcome {
    /// The basis took ownership.
    Absorbed,
    /// Bit-identical to the stored basis vector; nothing to learn.
    Duplicate(Box<Chunk>),
    /// Reduced (or displaced) row; keep scanning from its new lowest bit.
    Continue(Box<Chunk>),
}

/// Read one datagram from `conn` into `chunk`, validating the framing.
///
/// On success the chunk holds a syntactically sound header and
/// zero-extended data, and the datagram's source address is returned.
/// The caller decides which receiver state the chunk belongs to.
pub async fn recv_chunk(
    conn: &Arc<dyn Conn + Send + Sync>,
    chunk: &mut Chunk,
) -> Result<SocketAddr> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];
    let (n, source) = conn.recv_from(&mut buf).await?;
    if n > MAX_DATAGRAM_SIZE {
        return Err(Error::ErrDatagramTruncated);
    }

    chunk.unmarshal_datagram(&buf[..n])?;
    Ok(source)
}

/// Receiver is the per-message reassembly state machine.
///
/// Incoming chunks are reduced against a basis kept in reduced
/// row-echelon form, keyed by their column-selection masks: slot `i`
/// holds a chunk whose mask has bit `i` set and every lower bit clear.
/// Duplicates and linear combinations of what is already known reduce to
/// nothing and are handed back; anything else lands in an empty pivot
/// slot. Once every slot is filled, back-substitution turns the basis
/// into the original columns.
pub struct Receiver {
    first_received: SystemTime,
    source: SocketAddr,

    send_timestamp_us: u64,
    message_id: Uuid,
    hash: [u8; HASH_SIZE],
    message_bytes: u32,
    chunk_count: u16,

    chunk_received: u16,
    rows: Vec<Option<Box<Chunk>>>,
}

impl Receiver {
    /// Seed receive state from the first chunk of a message. The chunk
    /// itself still goes through `add_chunk`.
    pub fn new(source: SocketAddr, first: &Chunk) -> Self {
        let header = &first.header;
        debug!("receiver {}: new message from {}", header.message_id, source);

        Receiver {
            first_received: SystemTime::now(),
            source,
            send_timestamp_us: header.send_timestamp_us,
            message_id: header.message_id,
            hash: header.hash,
            message_bytes: header.message_bytes,
            chunk_count: header.chunk_count,
            chunk_received: 0,
            rows: (0..header.chunk_count).map(|_| None).collect(),
        }
    }

    /// Offer a chunk to the basis.
    ///
    /// The `Option` is the ownership handshake with the container pool:
    /// on return it holds a chunk for the caller to recycle (the rejected
    /// input, or a row the input displaced), or `None` when the basis
    /// kept the container. On error the chunk is left untouched and so is
    /// the receiver state.
    pub fn add_chunk(
        &mut self,
        source: SocketAddr,
        chunk: &mut Option<Box<Chunk>>,
    ) -> Result<AddStatus> {
        {
            let c = match chunk.as_ref() {
                Some(c) => c,
                None => return Err(Error::Other("add_chunk without a chunk".to_owned())),
            };

            if source != self.source {
                return Err(Error::ErrSourceMismatch);
            }
            if c.header.send_timestamp_us != self.send_timestamp_us {
                return Err(Error::ErrTimestampMismatch);
            }
            if c.header.message_id != self.message_id {
                return Err(Error::ErrMessageIdMismatch);
            }
            if c.header.hash != self.hash {
                return Err(Error::ErrHashMismatch);
            }
            if c.header.message_bytes != self.message_bytes {
                return Err(Error::ErrMessageBytesMismatch);
            }
            if c.header.chunk_count != self.chunk_count {
                return Err(Error::ErrChunkCountMismatch);
            }
        }

        if self.chunk_received == BACKSOLVED {
            // already extracted; the chunk goes straight back for recycling
            return Ok(AddStatus::Ready);
        }

        if let Some(owned) = chunk.take() {
            *chunk = self.reduce(owned);
        }

        if self.chunk_count > self.chunk_received {
            Ok(AddStatus::Needed(self.chunk_count - self.chunk_received))
        } else {
            Ok(AddStatus::Ready)
        }
    }

    /// Whether enough independent chunks have arrived to extract.
    pub fn is_ready(&self) -> bool {
        self.chunk_received >= self.chunk_count
    }

    /// Flatten the recovered message into `buf`.
    ///
    /// An empty `buf` is a sizing call and just reports the message
    /// length. Otherwise the first call triggers back-substitution; the
    /// copy is truncated at `buf.len()` and the full message length is
    /// returned. A complete copy is checked against the header digest.
    pub fn extract(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.chunk_received < self.chunk_count {
            return Err(Error::ErrNotReady);
        }

        let message_bytes = self.message_bytes as usize;
        if usize::from(self.chunk_count) * CHUNK_DATA_MAX < message_bytes {
            return Err(Error::ErrMessageBytesExceedCapacity);
        }

        if buf.is_empty() {
            return Ok(message_bytes);
        }

        self.backsolve();

        let limit = buf.len().min(message_bytes);
        let mut written = 0;
        for chunk in self.rows.iter().flatten() {
            if written == limit {
                break;
            }
            let to_read = CHUNK_DATA_MAX.min(limit - written);
            buf[written..written + to_read].copy_from_slice(&chunk.data[..to_read]);
            written += to_read;
        }

        if limit >= message_bytes {
            self.verify_hash(&buf[..message_bytes])?;
        }

        Ok(message_bytes)
    }

    /// Tear the state down, handing every stored container back for
    /// recycling.
    pub fn into_chunks(self) -> Vec<Box<Chunk>> {
        self.rows.into_iter().flatten().collect()
    }

    pub fn source(&self) -> SocketAddr {
        self.source
    }

    pub fn send_timestamp_us(&self) -> u64 {
        self.send_timestamp_us
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn payload_hash(&self) -> &[u8; HASH_SIZE] {
        &self.hash
    }

    pub fn message_bytes(&self) -> u32 {
        self.message_bytes
    }

    pub fn chunk_count(&self) -> u16 {
        self.chunk_count
    }

    /// Occupied pivot slots; `u16::MAX` once back-substitution has run.
    pub fn chunks_received(&self) -> u16 {
        self.chunk_received
    }

    /// When the first chunk of this message arrived, for the driver's
    /// age-out policy.
    pub fn first_received(&self) -> SystemTime {
        self.first_received
    }

    /// Run the chunk down the basis until it is absorbed, exposed as a
    /// duplicate, or reduced to nothing.
    fn reduce(&mut self, mut chunk: Box<Chunk>) -> Option<Box<Chunk>> {
        loop {
            let pivot = match chunk.header.mask.first_set_bit() {
                Some(pivot) if pivot < usize::from(self.chunk_count) => pivot,
                // empty mask: a combination of rows we already hold;
                // bits past chunk_count never index the basis
                _ => {
                    trace!("receiver {}: dependent chunk dropped", self.message_id);
                    return Some(chunk);
                }
            };

            chunk = match self.process_row(chunk, pivot) {
                RowOutcome::Absorbed => return None,
                RowOutcome::Duplicate(c) => {
                    trace!("receiver {}: duplicate of pivot dropped", self.message_id);
                    return Some(c);
                }
                RowOutcome::Continue(c) => c,
            };
        }
    }

    fn process_row(&mut self, mut chunk: Box<Chunk>, row: usize) -> RowOutcome {
        let mut stored = match self.rows[row].take() {
            None => {
                self.chunk_received += 1;
                trace!(
                    "receiver {}: pivot {} filled, {}/{}",
                    self.message_id,
                    row,
                    self.chunk_received,
                    self.chunk_count
                );
                self.rows[row] = Some(chunk);
                return RowOutcome::Absorbed;
            }
            Some(stored) => stored,
        };

        if chunk.header.mask.is_singleton(row) {
            if stored.header.mask == chunk.header.mask {
                self.rows[row] = Some(stored);
                return RowOutcome::Duplicate(chunk);
            }

            // A bare base chunk displaces a stored row that still mixes in
            // higher columns; the old row, minus the new one, re-enters
            // the scan. Keeping the narrower vector at each pivot is what
            // keeps the echelon form sound for back-substitution.
            stored.header.mask ^= chunk.header.mask;
            block_xor(&mut stored.data[..], &chunk.data[..]);
            self.rows[row] = Some(chunk);
            return RowOutcome::Continue(stored);
        }

        chunk.header.mask ^= stored.header.mask;
        block_xor(&mut chunk.data[..], &stored.data[..]);
        self.rows[row] = Some(stored);
        RowOutcome::Continue(chunk)
    }

    /// Reduce the completed row-echelon basis to the identity, leaving
    /// each slot holding its original column. Idempotent through the
    /// `chunk_received` sentinel.
    fn backsolve(&mut self) {
        if self.chunk_received != self.chunk_count {
            return;
        }

        for i in (0..usize::from(self.chunk_count)).rev() {
            let (lower, upper) = self.rows.split_at_mut(i);
            let hi = match upper.first().and_then(|c| c.as_ref()) {
                Some(hi) => hi,
                None => continue,
            };
            let bytes = usize::from(hi.header.chunk_bytes);

            for low in lower.iter_mut().flatten() {
                if low.header.mask.contains(i) {
                    block_xor(&mut low.data[..bytes], &hi.data[..bytes]);
                }
            }
        }

        self.chunk_received = BACKSOLVED;
    }

    fn verify_hash(&self, payload: &[u8]) -> Result<()> {
        if Sha256::digest(payload)[..] != self.hash[..] {
            return Err(Error::ErrPayloadDigestMismatch);
        }
        Ok(())
    }
}
