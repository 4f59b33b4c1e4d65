use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("payload is larger than CHUNK_MAX * CHUNK_DATA_MAX bytes")]
    ErrPayloadTooLarge,
    #[error("payload is empty")]
    ErrPayloadEmpty,
    #[error("short write, datagram was not sent whole")]
    ErrShortWrite,

    #[error("datagram exceeded the receive buffer")]
    ErrDatagramTruncated,
    #[error("datagram is smaller than a chunk header")]
    ErrDatagramTooShort,
    #[error("datagram size does not match header size plus chunk_bytes")]
    ErrDatagramSizeMismatch,
    #[error("header claims fewer message bytes than the chunk carries")]
    ErrMessageSmallerThanChunk,
    #[error("chunk_count is zero or exceeds CHUNK_MAX")]
    ErrChunkCountOutOfRange,
    #[error("message_bytes is too small for the claimed chunk_count")]
    ErrMessageTooSmallForCount,
    #[error("message_bytes is too large for the claimed chunk_count")]
    ErrMessageTooLargeForCount,

    #[error("chunk source address does not match this message")]
    ErrSourceMismatch,
    #[error("chunk send timestamp does not match this message")]
    ErrTimestampMismatch,
    #[error("chunk message id does not match this message")]
    ErrMessageIdMismatch,
    #[error("chunk payload hash does not match this message")]
    ErrHashMismatch,
    #[error("chunk message_bytes does not match this message")]
    ErrMessageBytesMismatch,
    #[error("chunk chunk_count does not match this message")]
    ErrChunkCountMismatch,

    #[error("message is not ready for extraction")]
    ErrNotReady,
    #[error("message_bytes exceeds chunk_count * CHUNK_DATA_MAX")]
    ErrMessageBytesExceedCapacity,
    #[error("recovered payload does not match the header digest")]
    ErrPayloadDigestMismatch,

    #[error("invalid SystemTime")]
    ErrInvalidSystemTime,

    #[error("{0}")]
    Util(#[from] util::Error),

    #[error("{0}")]
    Other(String),
}
