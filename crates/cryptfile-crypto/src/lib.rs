//! cryptfile-crypto: password-based streaming file encryption
//!
//! Architecture: Argon2id key derivation, then chunk-by-chunk XChaCha20-Poly1305
//!
//! Pipeline: password + random salt → Argon2id → 256-bit key → seal fixed-size chunks
//!
//! Stream layout:
//! ```text
//! Header (58 bytes): magic || version || KDF params || chunk size || salt || base nonce
//!   └── Chunk frames, index 0.., the last one flagged final
//!       [flag][len][ciphertext][tag]
//!       nonce = base_nonce || index (u64 BE), AAD = header || flag
//! ```
//!
//! Decryption reports three distinct failure kinds: the input is not ours
//! (`NotEncrypted`), a chunk tag did not verify (`DecryptionError`), or the
//! stream is structurally broken after a valid header (`IntegrityCheckFailed`).

pub mod chunk;
pub mod error;
pub mod header;
pub mod kdf;
pub mod stream;

pub use chunk::{nonce_for, ChunkCipher, SealedChunk};
pub use error::{ErrorKind, IntegrityFault, StreamError, StreamResult};
pub use header::Header;
pub use kdf::{derive_key, DerivedKey, KdfParams};
pub use stream::{
    decrypt_stream, encrypt_stream, CancelToken, Stage, StreamConfig, StreamEngine, StreamSummary,
};

/// Size of a derived key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of the random per-stream base nonce; the chunk index fills the rest
pub const BASE_NONCE_SIZE: usize = 16;

/// Size of the random per-stream KDF salt
pub const SALT_SIZE: usize = 16;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Default plaintext bytes per chunk (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Smallest chunk size accepted in a header or config
pub const MIN_CHUNK_SIZE: usize = 64;

/// Largest chunk size accepted in a header or config (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
