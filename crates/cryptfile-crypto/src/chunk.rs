//! Per-chunk XChaCha20-Poly1305 encryption/decryption and chunk framing
//!
//! Chunk frame format (binary):
//! ```text
//! [1 byte: flag, 0x00 = more follows, 0x01 = final][4 bytes: len, u32 BE]
//! [len bytes: ciphertext][16 bytes: Poly1305 tag]
//! nonce = base_nonce (16 bytes) || chunk_index (8 bytes, big-endian)
//! AAD   = encoded header (58 bytes) || flag
//! ```
//!
//! The nonce binds each chunk to its position, the AAD binds it to this
//! stream's header and to the final marker, so reordered, duplicated,
//! spliced or truncated chunks never verify.

use std::io::{self, Read, Write};

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Tag, XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use crate::error::{IntegrityFault, StreamError, StreamResult};
use crate::header::{read_full, Header, HEADER_LEN};
use crate::kdf::DerivedKey;
use crate::{BASE_NONCE_SIZE, NONCE_SIZE, TAG_SIZE};

/// Frame flag: another chunk follows
pub const FLAG_MORE: u8 = 0x00;
/// Frame flag: last chunk of the stream
pub const FLAG_FINAL: u8 = 0x01;

/// Bytes preceding the ciphertext in each frame (flag + length)
pub const FRAME_PREFIX_LEN: usize = 1 + 4;

/// Per-chunk nonce: the stream's random base nonce followed by the index.
///
/// Injective in `index`, so no two chunks of one stream share a nonce.
pub fn nonce_for(base_nonce: &[u8; BASE_NONCE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..BASE_NONCE_SIZE].copy_from_slice(base_nonce);
    nonce[BASE_NONCE_SIZE..].copy_from_slice(&index.to_be_bytes());
    nonce
}

/// One encrypted chunk as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedChunk {
    pub index: u64,
    pub is_final: bool,
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl SealedChunk {
    /// Bytes this chunk occupies in the stream.
    pub fn frame_len(&self) -> usize {
        FRAME_PREFIX_LEN + self.ciphertext.len() + TAG_SIZE
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let flag = if self.is_final { FLAG_FINAL } else { FLAG_MORE };
        let len = u32::try_from(self.ciphertext.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk exceeds u32 length"))?;
        writer.write_all(&[flag])?;
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(&self.ciphertext)?;
        writer.write_all(&self.tag)
    }

    /// Read the frame for chunk `index`.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary;
    /// the caller decides whether that end was expected. Ending anywhere
    /// else, or a frame that breaks the chunk-size rules, is an
    /// [`IntegrityFault`].
    pub fn read_from<R: Read>(
        reader: &mut R,
        index: u64,
        chunk_size: usize,
    ) -> StreamResult<Option<Self>> {
        let mut prefix = [0u8; FRAME_PREFIX_LEN];
        match read_full(reader, &mut prefix)? {
            0 => return Ok(None),
            n if n < FRAME_PREFIX_LEN => {
                return Err(IntegrityFault::Truncated { index }.into());
            }
            _ => {}
        }

        let is_final = match prefix[0] {
            FLAG_MORE => false,
            FLAG_FINAL => true,
            flag => return Err(IntegrityFault::InvalidFrameFlag { index, flag }.into()),
        };
        let len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
        if len > chunk_size {
            return Err(IntegrityFault::OversizedChunk {
                index,
                len,
                chunk_size,
            }
            .into());
        }
        if !is_final && len != chunk_size {
            return Err(IntegrityFault::ShortChunk {
                index,
                len,
                chunk_size,
            }
            .into());
        }

        let mut ciphertext = vec![0u8; len];
        let mut tag = [0u8; TAG_SIZE];
        if read_full(reader, &mut ciphertext)? < len || read_full(reader, &mut tag)? < TAG_SIZE {
            return Err(IntegrityFault::Truncated { index }.into());
        }

        Ok(Some(Self {
            index,
            is_final,
            ciphertext,
            tag,
        }))
    }
}

/// Seals and opens the chunks of one stream under one derived key.
pub struct ChunkCipher {
    aead: XChaCha20Poly1305,
    base_nonce: [u8; BASE_NONCE_SIZE],
    header: [u8; HEADER_LEN],
}

impl ChunkCipher {
    pub fn new(key: &DerivedKey, header: &Header) -> Self {
        Self {
            aead: XChaCha20Poly1305::new(key.as_bytes().into()),
            base_nonce: header.base_nonce,
            header: header.encode(),
        }
    }

    /// Encrypt chunk `index` of the stream.
    pub fn seal(&self, index: u64, is_final: bool, plaintext: &[u8]) -> StreamResult<SealedChunk> {
        let nonce = nonce_for(&self.base_nonce, index);
        let aad = self.build_aad(is_final);

        let mut ciphertext = plaintext.to_vec();
        let tag = self
            .aead
            .encrypt_in_place_detached(XNonce::from_slice(&nonce), &aad, &mut ciphertext)
            .map_err(|_| StreamError::SealFailed { index })?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(&tag);

        Ok(SealedChunk {
            index,
            is_final,
            ciphertext,
            tag: tag_bytes,
        })
    }

    /// Verify and decrypt one chunk.
    ///
    /// The tag is checked over the whole chunk before anything is returned;
    /// on failure the working buffer is wiped and no plaintext escapes.
    pub fn open(&self, chunk: &SealedChunk) -> StreamResult<Zeroizing<Vec<u8>>> {
        let nonce = nonce_for(&self.base_nonce, chunk.index);
        let aad = self.build_aad(chunk.is_final);

        let mut plaintext = Zeroizing::new(chunk.ciphertext.clone());
        self.aead
            .decrypt_in_place_detached(
                XNonce::from_slice(&nonce),
                &aad,
                plaintext.as_mut_slice(),
                Tag::from_slice(&chunk.tag),
            )
            .map_err(|_| StreamError::DecryptionFailed { index: chunk.index })?;

        Ok(plaintext)
    }

    /// AAD: encoded header || final flag
    fn build_aad(&self, is_final: bool) -> [u8; HEADER_LEN + 1] {
        let mut aad = [0u8; HEADER_LEN + 1];
        aad[..HEADER_LEN].copy_from_slice(&self.header);
        aad[HEADER_LEN] = if is_final { FLAG_FINAL } else { FLAG_MORE };
        aad
    }
}
