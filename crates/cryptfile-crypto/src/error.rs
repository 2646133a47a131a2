//! Error taxonomy for stream operations.
//!
//! Every failure surfaces as a [`StreamError`]; [`StreamError::kind`] folds it
//! into the small [`ErrorKind`] set that callers branch on.

use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Leading bytes are not a cryptfile header (or there are too few of them).
    #[error("input is not an encrypted stream")]
    NotEncrypted,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The tag of one chunk did not verify. No plaintext of that chunk was released.
    #[error("chunk {index} failed authentication")]
    DecryptionFailed { index: u64 },

    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(IntegrityFault),

    #[error("invalid KDF parameters: {0}")]
    InvalidKdfParams(String),

    #[error("invalid chunk size {size} (allowed {min}..={max})")]
    InvalidChunkSize { size: usize, min: usize, max: usize },

    #[error("chunk {index} encryption failed")]
    SealFailed { index: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structural problems found after a valid header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntegrityFault {
    #[error("stream truncated inside chunk {index}")]
    Truncated { index: u64 },

    #[error("stream ended after {chunks} chunks without a final chunk")]
    MissingFinalChunk { chunks: u64 },

    #[error("chunk {index} has invalid frame flag {flag:#04x}")]
    InvalidFrameFlag { index: u64, flag: u8 },

    #[error("chunk {index} declares {len} bytes, more than the chunk size {chunk_size}")]
    OversizedChunk { index: u64, len: usize, chunk_size: usize },

    #[error("non-final chunk {index} declares {len} bytes, expected {chunk_size}")]
    ShortChunk { index: u64, len: usize, chunk_size: usize },

    #[error("unexpected data after the final chunk")]
    TrailingData,
}

/// Coarse classification consumed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotEncrypted,
    DecryptionError,
    IntegrityCheckFailed,
    /// Recognised format, but a version or parameter we cannot handle.
    Format,
    /// Caller-supplied parameters rejected before any I/O.
    InvalidParameters,
    Cancelled,
    Io,
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::NotEncrypted => ErrorKind::NotEncrypted,
            StreamError::DecryptionFailed { .. } => ErrorKind::DecryptionError,
            StreamError::IntegrityCheckFailed(_) => ErrorKind::IntegrityCheckFailed,
            StreamError::UnsupportedVersion(_) | StreamError::MalformedHeader(_) => {
                ErrorKind::Format
            }
            StreamError::InvalidKdfParams(_) | StreamError::InvalidChunkSize { .. } => {
                ErrorKind::InvalidParameters
            }
            StreamError::SealFailed { .. } | StreamError::Io(_) => ErrorKind::Io,
            StreamError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True for the three outcomes that concern the encrypted content itself.
    pub fn is_crypto(&self) -> bool {
        self.kind().is_crypto()
    }
}

impl ErrorKind {
    pub fn is_crypto(self) -> bool {
        matches!(
            self,
            ErrorKind::NotEncrypted | ErrorKind::DecryptionError | ErrorKind::IntegrityCheckFailed
        )
    }
}

impl From<IntegrityFault> for StreamError {
    fn from(fault: IntegrityFault) -> Self {
        StreamError::IntegrityCheckFailed(fault)
    }
}
