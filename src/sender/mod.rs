
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use log::{debug, trace};
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use util::Conn;

use crate::chunk::chunk_header::{ChunkHeader, HEADER_SIZE};
use crate::error::{Error, Result};
use crate::mask::ColumnMask;
use crate::xor::block_xor;
use crate::{CHUNK_DATA_MAX, CHUNK_MAX, MAX_REDUNDANT};

/// Outcome of one sender pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// Every scheduled chunk has been emitted.
    Done,
    /// More pumps are needed.
    More,
}

/// Sender configuration.
pub struct Config {
    pub conn: Arc<dyn Conn + Send + Sync>,
    pub dst: SocketAddr,
    /// The message to deliver; at most CHUNK_MAX * CHUNK_DATA_MAX bytes.
    pub payload: Bytes,
    /// Requested random parity rows, clamped to MAX_REDUNDANT.
    pub redundancy: usize,
}

/// Sender is the per-message transmit state machine.
///
/// Each `pump` emits one datagram and advances the schedule: every base
/// column, then a parity over all columns twice, then each random parity
/// row twice. The caller drives the pump until `Done`; nothing is
/// buffered and a transport error simply retries the same step on the
/// next call.
pub struct Sender {
    conn: Arc<dyn Conn + Send + Sync>,
    dst: SocketAddr,
    payload: Bytes,
    n_base: usize,
    n_redundant: usize,
    progress: usize,
    header: ChunkHeader,
    masks: Vec<ColumnMask>,
    scratch: Box<[u8; CHUNK_DATA_MAX]>,
}

impl Sender {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_rng(config, &mut thread_rng())
    }

    /// Like `new`, but draws the parity row lottery from `rng` instead of
    /// the thread-local CSPRNG, so tests can seed the schedule.
    pub fn with_rng<R: Rng>(config: Config, rng: &mut R) -> Result<Self> {
        let n_bytes = config.payload.len();
        if n_bytes == 0 {
            return Err(Error::ErrPayloadEmpty);
        }
        if n_bytes > CHUNK_MAX * CHUNK_DATA_MAX {
            return Err(Error::ErrPayloadTooLarge);
        }

        let n_base = (n_bytes + CHUNK_DATA_MAX - 1) / CHUNK_DATA_MAX;
        let n_redundant = config.redundancy.min(MAX_REDUNDANT);

        let mut header = ChunkHeader {
            send_timestamp_us: unix_micros()?,
            message_id: Uuid::new_v4(),
            message_bytes: n_bytes as u32,
            chunk_count: n_base as u16,
            ..Default::default()
        };
        header.hash.copy_from_slice(&Sha256::digest(&config.payload));

        debug!(
            "sender {}: {} bytes over {} columns, {} random rows",
            header.message_id, n_bytes, n_base, n_redundant
        );

        Ok(Sender {
            conn: config.conn,
            dst: config.dst,
            payload: config.payload,
            n_base,
            n_redundant,
            progress: 0,
            header,
            masks: random_row_masks(n_base, n_redundant, rng),
            scratch: Box::new([0u8; CHUNK_DATA_MAX]),
        })
    }

    /// Total scheduled transmissions: every base column, then two copies
    /// each of the full parity and of every random parity row.
    pub fn n_steps(&self) -> usize {
        self.n_base + 2 * (1 + self.n_redundant)
    }

    pub fn progress(&self) -> usize {
        self.progress
    }

    pub fn message_id(&self) -> Uuid {
        self.header.message_id
    }

    /// Emit one chunk and advance.
    ///
    /// Returns `More` while transmissions remain, `Done` once the whole
    /// schedule has been emitted. A transport error leaves `progress`
    /// unchanged so the same step is retried on the next pump.
    pub async fn pump(&mut self) -> Result<PumpStatus> {
        let n_steps = self.n_steps();

        while self.progress < n_steps {
            if self.progress < self.n_base {
                self.pump_base().await?;
            } else if self.n_base == 1 {
                self.pump_singleton().await?;
            } else if self.progress <= self.n_base + 1 {
                self.pump_full_row().await?;
            } else if !self.pump_random_row().await? {
                // the row selected no columns, try the next pair
                continue;
            }
            break;
        }

        if self.progress >= n_steps {
            Ok(PumpStatus::Done)
        } else {
            Ok(PumpStatus::More)
        }
    }

    async fn pump_base(&mut self) -> Result<()> {
        let offset = self.progress * CHUNK_DATA_MAX;
        let size = (self.payload.len() - offset).min(CHUNK_DATA_MAX);

        self.header.chunk_bytes = size as u16;
        self.header.mask = ColumnMask::singleton(self.progress);

        self.send_chunk(&self.payload[offset..offset + size]).await?;
        self.progress += 1;
        Ok(())
    }

    /// A one-column message: parity over a single column is the column
    /// itself, so one repeat of the base chunk replaces every parity
    /// phase and the schedule halts after two copies total.
    async fn pump_singleton(&mut self) -> Result<()> {
        self.header.chunk_bytes = self.payload.len() as u16;
        self.header.mask = ColumnMask::singleton(0);

        self.send_chunk(&self.payload[..]).await?;
        self.progress = self.n_steps();
        Ok(())
    }

    async fn pump_full_row(&mut self) -> Result<()> {
        if self.progress == self.n_base {
            self.header.mask = ColumnMask::filled(self.n_base);
            self.header.chunk_bytes = CHUNK_DATA_MAX as u16;
            xor_columns(&self.header.mask, &self.payload, self.n_base, &mut self.scratch);
        }
        // second copy of the pair reuses the accumulated parity

        self.send_chunk(&self.scratch[..]).await?;
        self.progress += 1;
        Ok(())
    }

    /// Returns false when the pair was skipped because the row's mask
    /// selected no columns.
    async fn pump_random_row(&mut self) -> Result<bool> {
        let offset = self.progress - self.n_base - 2;
        let row = offset / 2;

        if offset % 2 == 0 {
            self.header.mask = self.masks[row];
            self.header.chunk_bytes = CHUNK_DATA_MAX as u16;
            if !xor_columns(&self.header.mask, &self.payload, self.n_base, &mut self.scratch) {
                trace!("sender {}: empty parity row {}, skipped", self.header.message_id, row);
                self.progress += 2;
                return Ok(false);
            }
        }

        self.send_chunk(&self.scratch[..]).await?;
        self.progress += 1;
        Ok(true)
    }

    async fn send_chunk(&self, data: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len());
        self.header.marshal_to(&mut buf)?;
        buf.extend_from_slice(data);

        let n = self.conn.send_to(&buf, self.dst).await?;
        if n != buf.len() {
            return Err(Error::ErrShortWrite);
        }

        trace!(
            "sender {}: step {}/{}, {} bytes",
            self.header.message_id,
            self.progress,
            self.n_steps(),
            n
        );
        Ok(())
    }
}

fn unix_micros() -> Result<u64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| Error::ErrInvalidSystemTime)?;
    Ok(now.as_micros() as u64)
}

/// Build the column-selection masks for the random parity rows.
///
/// Every column runs its own lottery: a partial Fisher-Yates over the row
/// indices picks, without replacement, the ceil(k/2) rows that will carry
/// the column. Each column therefore lands in exactly ceil(k/2) of the k
/// rows and each row converges to a density of about half the columns.
fn random_row_masks<R: Rng>(n_base: usize, n_redundant: usize, rng: &mut R) -> Vec<ColumnMask> {
    let mut masks = vec![ColumnMask::default(); n_redundant];
    let mut rows: Vec<u8> = vec![0; n_redundant];
    let mut bits = vec![0u32; n_redundant];

    for column in 0..n_base {
        for (i, row) in rows.iter_mut().enumerate() {
            *row = i as u8;
        }
        rng.fill(bits.as_mut_slice());

        for j in 0..(n_redundant + 1) / 2 {
            // unbiased pick from the not-yet-chosen suffix
            let t = ((u64::from(bits[j]) * (n_redundant - j) as u64) >> 32) as usize;
            rows.swap(j, j + t);
            masks[usize::from(rows[j])].set(column);
        }
    }

    masks
}

/// XOR the selected columns of `payload` into `scratch`, zero-extending
/// the short last column. Returns false when the mask selected nothing.
fn xor_columns(
    mask: &ColumnMask,
    payload: &Bytes,
    n_base: usize,
    scratch: &mut [u8; CHUNK_DATA_MAX],
) -> bool {
    let mut initialised = false;

    for column in 0..n_base {
        if !mask.contains(column) {
            continue;
        }

        let offset = column * CHUNK_DATA_MAX;
        let bytes = (payload.len() - offset).min(CHUNK_DATA_MAX);
        let buf = &payload[offset..offset + bytes];

        if initialised {
            block_xor(&mut scratch[..bytes], buf);
        } else {
            initialised = true;
            scratch[..bytes].copy_from_slice(buf);
            scratch[bytes..].fill(0);
        }
    }

    initialised
}
