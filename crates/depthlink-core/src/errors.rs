use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Host must not be empty")]
    EmptyHost,

    #[error("Invalid port {value:?} (expected 1-65535)")]
    InvalidPort { value: String },

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("Could not persist endpoint: {reason}")]
    Persist { reason: String },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Filename is not valid UTF-8")]
    InvalidFilename,

    #[error("Invalid is-last marker 0x{0:02x}")]
    InvalidLastFlag(u8),

    #[error("Unknown content kind tag 0x{0:02x}")]
    UnknownContentKind(u8),

    #[error("Chunk of {len} bytes exceeds the {max} byte limit")]
    ChunkTooLarge { len: u32, max: u32 },
}

impl WireError {
    /// Whether the decoder consumed the offending frame and the stream is
    /// still positioned on a frame boundary.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ChunkTooLarge { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Row of {row_bytes} bytes does not fit in a stride of {stride} bytes")]
    StrideTooSmall { row_bytes: usize, stride: usize },

    #[error("Buffer too short: expected at least {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },
}
