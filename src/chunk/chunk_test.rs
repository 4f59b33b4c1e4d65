use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use super::chunk_header::*;
use super::*;
use crate::mask::ColumnMask;
use crate::CHUNK_DATA_MAX;

fn sample_header() -> ChunkHeader {
    let mut hash = [0u8; HASH_SIZE];
    for (i, b) in hash.iter_mut().enumerate() {
        *b = i as u8;
    }

    ChunkHeader {
        send_timestamp_us: 0x0102_0304_0506_0708,
        message_id: Uuid::from_bytes([0xAB; 16]),
        hash,
        message_bytes: 20_000,
        chunk_count: 3,
        chunk_bytes: 3616,
        mask: ColumnMask::singleton(2),
    }
}

fn sample_datagram(header: &ChunkHeader) -> BytesMut {
    let mut raw = BytesMut::new();
    header
        .marshal_to(&mut raw)
        .expect("marshal should not fail");
    for i in 0..usize::from(header.chunk_bytes) {
        raw.put_u8((i % 251) as u8);
    }
    raw
}

#[test]
fn test_header_marshal_layout() -> Result<()> {
    let header = sample_header();
    let mut raw = BytesMut::new();
    header.marshal_to(&mut raw)?;

    assert_eq!(raw.len(), HEADER_SIZE);
    // little-endian timestamp occupies the first eight bytes
    assert_eq!(&raw[..8], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&raw[8..24], &[0xAB; 16]);
    // message_bytes = 20000 = 0x4E20 right after the hash
    assert_eq!(&raw[56..60], &[0x20, 0x4E, 0x00, 0x00]);
    // chunk_count, then chunk_bytes = 3616 = 0x0E20
    assert_eq!(&raw[60..62], &[0x03, 0x00]);
    assert_eq!(&raw[62..64], &[0x20, 0x0E]);

    let round = ChunkHeader::unmarshal(&raw)?;
    assert_eq!(round, header, "unmarshaled header should match");

    Ok(())
}

#[test]
fn test_datagram_round_trip() -> Result<()> {
    let header = sample_header();
    let raw = sample_datagram(&header);

    let mut chunk = Chunk::boxed();
    chunk.unmarshal_datagram(&raw)?;

    assert_eq!(chunk.header, header);
    assert_eq!(chunk.payload(), &raw[HEADER_SIZE..]);
    assert!(
        chunk.data[usize::from(header.chunk_bytes)..]
            .iter()
            .all(|b| *b == 0),
        "container tail should read as zero"
    );

    let again = chunk.marshal()?;
    assert_eq!(&again[..], &raw[..], "remarshal should be byte identical");

    Ok(())
}

#[test]
fn test_reject_short_datagram() {
    let mut chunk = Chunk::boxed();
    let result = chunk.unmarshal_datagram(&[0u8; HEADER_SIZE - 1]);
    assert_eq!(result, Err(Error::ErrDatagramTooShort));
}

#[test]
fn test_reject_size_mismatch() {
    let header = sample_header();
    let raw = sample_datagram(&header);
    let mut chunk = Chunk::boxed();

    // one data byte shaved off
    let result = chunk.unmarshal_datagram(&raw[..raw.len() - 1]);
    assert_eq!(result, Err(Error::ErrDatagramSizeMismatch));

    // one byte of trailing garbage
    let mut longer = raw.clone();
    longer.put_u8(0);
    let result = chunk.unmarshal_datagram(&longer);
    assert_eq!(result, Err(Error::ErrDatagramSizeMismatch));
}

#[test]
fn test_reject_message_smaller_than_chunk() {
    let mut header = sample_header();
    header.chunk_count = 1;
    header.chunk_bytes = 100;
    header.message_bytes = 50;
    let raw = sample_datagram(&header);

    let mut chunk = Chunk::boxed();
    let result = chunk.unmarshal_datagram(&raw);
    assert_eq!(result, Err(Error::ErrMessageSmallerThanChunk));
}

#[test]
fn test_reject_chunk_count_out_of_range() {
    let mut header = sample_header();
    header.chunk_count = 0;
    header.message_bytes = u32::from(header.chunk_bytes);
    let raw = sample_datagram(&header);

    let mut chunk = Chunk::boxed();
    assert_eq!(
        chunk.unmarshal_datagram(&raw),
        Err(Error::ErrChunkCountOutOfRange)
    );

    let mut header = sample_header();
    header.chunk_count = (CHUNK_MAX + 1) as u16;
    header.message_bytes = u32::MAX;
    let raw = sample_datagram(&header);
    assert_eq!(
        chunk.unmarshal_datagram(&raw),
        Err(Error::ErrChunkCountOutOfRange)
    );
}

#[test]
fn test_reject_message_too_small_for_count() {
    // two columns claimed, but the message fits in one
    let mut header = sample_header();
    header.chunk_count = 2;
    header.chunk_bytes = CHUNK_DATA_MAX as u16;
    header.message_bytes = CHUNK_DATA_MAX as u32;
    let raw = sample_datagram(&header);

    let mut chunk = Chunk::boxed();
    assert_eq!(
        chunk.unmarshal_datagram(&raw),
        Err(Error::ErrMessageTooSmallForCount)
    );
}

#[test]
fn test_reject_message_too_large_for_count() {
    // one column of ten bytes cannot hold an eleven byte message
    let mut header = sample_header();
    header.chunk_count = 1;
    header.chunk_bytes = 10;
    header.message_bytes = 11;
    let raw = sample_datagram(&header);

    let mut chunk = Chunk::boxed();
    assert_eq!(
        chunk.unmarshal_datagram(&raw),
        Err(Error::ErrMessageTooLargeForCount)
    );
}

#[test]
fn test_clear_rezeroes_container() -> Result<()> {
    let header = sample_header();
    let raw = sample_datagram(&header);

    let mut chunk = Chunk::boxed();
    chunk.unmarshal_datagram(&raw)?;
    chunk.clear();

    assert_eq!(chunk.header, ChunkHeader::default());
    assert!(chunk.data.iter().all(|b| *b == 0));

    Ok(())
}
