//! Fixed-layout stream header
//!
//! Binary format (58 bytes, integers big-endian):
//! ```text
//! [8 bytes: magic "CRYPTFIL"][1 byte: version]
//! [1 byte: KDF algorithm][4: mem_cost_kib][4: time_cost][4: parallelism]
//! [4 bytes: chunk size][16 bytes: salt][16 bytes: base nonce]
//! ```
//!
//! The encoded header doubles as associated data for every chunk, so any
//! edit to it is caught by the first tag check.

use std::io::{self, Read, Write};

use rand::RngCore;

use crate::error::{StreamError, StreamResult};
use crate::kdf::KdfParams;
use crate::{BASE_NONCE_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, SALT_SIZE};

/// Format marker at offset 0 of every encrypted stream
pub const MAGIC: [u8; 8] = *b"CRYPTFIL";

/// Current (and only) layout version
pub const FORMAT_VERSION: u8 = 1;

/// KDF algorithm id for Argon2id v0x13
pub const KDF_ARGON2ID: u8 = 1;

/// Encoded header length
pub const HEADER_LEN: usize = 8 + 1 + 1 + 4 + 4 + 4 + 4 + SALT_SIZE + BASE_NONCE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kdf: KdfParams,
    /// Plaintext bytes per non-final chunk
    pub chunk_size: u32,
    pub salt: [u8; SALT_SIZE],
    pub base_nonce: [u8; BASE_NONCE_SIZE],
}

impl Header {
    pub fn new(
        kdf: KdfParams,
        chunk_size: u32,
        salt: [u8; SALT_SIZE],
        base_nonce: [u8; BASE_NONCE_SIZE],
    ) -> Self {
        Self {
            kdf,
            chunk_size,
            salt,
            base_nonce,
        }
    }

    /// Fresh header with a random salt and base nonce.
    pub fn generate(kdf: KdfParams, chunk_size: u32) -> Self {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut salt);
        let mut base_nonce = [0u8; BASE_NONCE_SIZE];
        rng.fill_bytes(&mut base_nonce);
        Self::new(kdf, chunk_size, salt, base_nonce)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut pos = 0;
        let mut put = |bytes: &[u8]| {
            out[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        };
        put(&MAGIC);
        put(&[FORMAT_VERSION, KDF_ARGON2ID]);
        put(&self.kdf.mem_cost_kib.to_be_bytes());
        put(&self.kdf.time_cost.to_be_bytes());
        put(&self.kdf.parallelism.to_be_bytes());
        put(&self.chunk_size.to_be_bytes());
        put(&self.salt);
        put(&self.base_nonce);
        out
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode())
    }

    /// Parse a header from its encoded form.
    ///
    /// A marker mismatch is `NotEncrypted`; a recognised marker with an
    /// unknown version or out-of-range parameters is a format error.
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> StreamResult<Self> {
        let (magic, rest) = bytes.split_at(MAGIC.len());
        if magic != MAGIC {
            return Err(StreamError::NotEncrypted);
        }

        let version = rest[0];
        if version != FORMAT_VERSION {
            return Err(StreamError::UnsupportedVersion(version));
        }
        let algorithm = rest[1];
        if algorithm != KDF_ARGON2ID {
            return Err(StreamError::MalformedHeader(format!(
                "unknown KDF algorithm {algorithm}"
            )));
        }

        let u32_at = |off: usize| {
            u32::from_be_bytes([rest[off], rest[off + 1], rest[off + 2], rest[off + 3]])
        };
        let kdf = KdfParams {
            mem_cost_kib: u32_at(2),
            time_cost: u32_at(6),
            parallelism: u32_at(10),
        };
        kdf.validate().map_err(|e| StreamError::MalformedHeader(e.to_string()))?;

        let chunk_size = u32_at(14);
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&(chunk_size as usize)) {
            return Err(StreamError::MalformedHeader(format!(
                "chunk size {chunk_size} outside {MIN_CHUNK_SIZE}..={MAX_CHUNK_SIZE}"
            )));
        }

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&rest[18..18 + SALT_SIZE]);
        let mut base_nonce = [0u8; BASE_NONCE_SIZE];
        base_nonce.copy_from_slice(&rest[18 + SALT_SIZE..18 + SALT_SIZE + BASE_NONCE_SIZE]);

        Ok(Self::new(kdf, chunk_size, salt, base_nonce))
    }

    /// Read and parse the header at the start of `reader`.
    ///
    /// Streams shorter than [`HEADER_LEN`] are `NotEncrypted`.
    pub fn read_from<R: Read>(reader: &mut R) -> StreamResult<Self> {
        let mut buf = [0u8; HEADER_LEN];
        let n = read_full(reader, &mut buf)?;
        if n < HEADER_LEN {
            return Err(StreamError::NotEncrypted);
        }
        Self::decode(&buf)
    }
}

/// Fill `buf` as far as the reader allows; returns the byte count, which is
/// short only at end of stream.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample() -> Header {
        Header::new(KdfParams::default(), 65536, [0x11; SALT_SIZE], [0x22; BASE_NONCE_SIZE])
    }

    #[test]
    fn test_header_len() {
        assert_eq!(HEADER_LEN, 58);
        assert_eq!(sample().encode().len(), HEADER_LEN);
    }

    #[test]
    fn test_encode_layout() {
        let bytes = sample().encode();
        assert_eq!(&bytes[..8], b"CRYPTFIL");
        assert_eq!(bytes[8], FORMAT_VERSION);
        assert_eq!(bytes[9], KDF_ARGON2ID);
        assert_eq!(&bytes[10..14], &65536u32.to_be_bytes());
        assert_eq!(&bytes[22..26], &65536u32.to_be_bytes());
        assert_eq!(&bytes[26..42], &[0x11; SALT_SIZE]);
        assert_eq!(&bytes[42..58], &[0x22; BASE_NONCE_SIZE]);
    }

    #[test]
    fn test_read_back() {
        let header = sample();
        let mut encoded = Vec::new();
        header.write_to(&mut encoded).unwrap();
        encoded.extend_from_slice(b"chunk data follows");

        let mut reader = encoded.as_slice();
        let parsed = Header::read_from(&mut reader).unwrap();
        assert_eq!(parsed, header);
        // Reader is left at the first chunk
        assert_eq!(reader, b"chunk data follows");
    }

    #[test]
    fn test_generate_is_random() {
        let a = Header::generate(KdfParams::default(), 4096);
        let b = Header::generate(KdfParams::default(), 4096);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.base_nonce, b.base_nonce);
    }

    #[test]
    fn test_plaintext_is_not_encrypted() {
        let text = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod.";
        let err = Header::read_from(&mut text.as_slice()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEncrypted);
    }

    #[test]
    fn test_short_input_is_not_encrypted() {
        let err = Header::read_from(&mut &b""[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEncrypted);

        let encoded = sample().encode();
        let err = Header::read_from(&mut &encoded[..20]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEncrypted);
    }

    #[test]
    fn test_unknown_version_is_format_error() {
        let mut bytes = sample().encode();
        bytes[8] = 2;
        let err = Header::decode(&bytes).unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedVersion(2)));
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_unknown_kdf_is_malformed() {
        let mut bytes = sample().encode();
        bytes[9] = 7;
        let err = Header::decode(&bytes).unwrap_err();
        assert!(matches!(err, StreamError::MalformedHeader(_)));
    }

    #[test]
    fn test_zero_time_cost_is_malformed() {
        let mut bytes = sample().encode();
        bytes[14..18].copy_from_slice(&0u32.to_be_bytes());
        let err = Header::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_chunk_size_bounds() {
        let mut bytes = sample().encode();
        bytes[22..26].copy_from_slice(&0u32.to_be_bytes());
        assert_eq!(Header::decode(&bytes).unwrap_err().kind(), ErrorKind::Format);

        let too_big = (MAX_CHUNK_SIZE as u32) + 1;
        bytes[22..26].copy_from_slice(&too_big.to_be_bytes());
        assert_eq!(Header::decode(&bytes).unwrap_err().kind(), ErrorKind::Format);
    }
}
