//! Stream engine: header, key derivation and chunk loop for whole streams
//!
//! ```text
//! Init ──► HeaderHandled ──► Streaming ──► Finished
//!   └──────────┴─────────────────┴──────► Failed(kind)
//! ```
//!
//! Chunks are read in index order and handed to the rayon pool in batches of
//! `workers`; results are written back strictly in index order, and on
//! decrypt the first failing chunk of a batch stops the stream. The derived
//! key lives only inside one `encrypt`/`decrypt` call and is wiped on every
//! exit path when it drops.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use secrecy::SecretString;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::chunk::{ChunkCipher, SealedChunk};
use crate::error::{ErrorKind, IntegrityFault, StreamError, StreamResult};
use crate::header::{read_full, Header, HEADER_LEN};
use crate::kdf::{derive_key, KdfParams};
use crate::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Parameters for new streams. Decryption takes KDF params and chunk size
/// from the header instead; only `workers` applies to both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub kdf: KdfParams,
    /// Plaintext bytes per chunk (default: 64 KiB)
    pub chunk_size: usize,
    /// Chunks processed concurrently (0 = rayon thread count)
    pub workers: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: 0,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> StreamResult<()> {
        self.kdf.validate()?;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(StreamError::InvalidChunkSize {
                size: self.chunk_size,
                min: MIN_CHUNK_SIZE,
                max: MAX_CHUNK_SIZE,
            });
        }
        Ok(())
    }

    fn batch_len(&self) -> usize {
        match self.workers {
            0 => rayon::current_num_threads().max(1),
            n => n,
        }
    }
}

/// Cooperative cancellation, observed between chunk batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    HeaderHandled,
    Streaming,
    Finished,
    Failed(ErrorKind),
}

/// Byte and chunk counts of a completed operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub chunks: u64,
    pub plaintext_bytes: u64,
    /// Encrypted stream size, header included
    pub ciphertext_bytes: u64,
}

impl StreamSummary {
    fn record(&mut self, chunk: &SealedChunk) {
        self.chunks += 1;
        self.plaintext_bytes += chunk.ciphertext.len() as u64;
        self.ciphertext_bytes += chunk.frame_len() as u64;
    }
}

pub struct StreamEngine {
    config: StreamConfig,
    cancel: CancelToken,
    stage: Stage,
}

impl StreamEngine {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
            stage: Stage::Init,
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Stage reached by the most recent operation.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Encrypt everything `input` yields into `output`.
    pub fn encrypt<R: Read, W: Write>(
        &mut self,
        mut input: R,
        mut output: W,
        password: &SecretString,
    ) -> StreamResult<StreamSummary> {
        self.stage = Stage::Init;
        let result = self.run_encrypt(&mut input, &mut output, password);
        self.conclude(result)
    }

    /// Decrypt a stream produced by [`StreamEngine::encrypt`].
    ///
    /// Only authenticated plaintext is written. On failure, bytes of chunks
    /// verified before the failing one may already be in `output`; discarding
    /// them is up to the caller.
    pub fn decrypt<R: Read, W: Write>(
        &mut self,
        mut input: R,
        mut output: W,
        password: &SecretString,
    ) -> StreamResult<StreamSummary> {
        self.stage = Stage::Init;
        let result = self.run_decrypt(&mut input, &mut output, password);
        self.conclude(result)
    }

    fn run_encrypt<R: Read, W: Write>(
        &mut self,
        input: &mut R,
        output: &mut W,
        password: &SecretString,
    ) -> StreamResult<StreamSummary> {
        self.config.validate()?;
        let chunk_size = self.config.chunk_size;
        let batch_len = self.config.batch_len();
        debug!(
            chunk_size,
            workers = batch_len,
            mem_cost_kib = self.config.kdf.mem_cost_kib,
            time_cost = self.config.kdf.time_cost,
            "encrypting stream"
        );

        let header = Header::generate(self.config.kdf, chunk_size as u32);
        let cipher = {
            let key = derive_key(password, &header.salt, &header.kdf)?;
            ChunkCipher::new(&key, &header)
        };
        header.write_to(output)?;
        self.advance(Stage::HeaderHandled);

        let mut summary = StreamSummary {
            ciphertext_bytes: HEADER_LEN as u64,
            ..StreamSummary::default()
        };
        self.advance(Stage::Streaming);

        let mut next_index = 0u64;
        let mut pending = read_chunk(input, chunk_size)?;
        loop {
            self.check_cancelled()?;

            // A full chunk is final only if nothing follows it, so read one ahead.
            let mut batch = Vec::with_capacity(batch_len);
            let mut finished = false;
            while batch.len() < batch_len {
                let lookahead = if pending.len() < chunk_size {
                    None
                } else {
                    Some(read_chunk(input, chunk_size)?)
                };
                let is_final = lookahead.as_ref().map_or(true, |next| next.is_empty());
                let plaintext = std::mem::replace(
                    &mut pending,
                    lookahead.unwrap_or_else(|| Zeroizing::new(Vec::new())),
                );
                batch.push((next_index, is_final, plaintext));
                next_index += 1;
                if is_final {
                    finished = true;
                    break;
                }
            }

            let sealed: Vec<StreamResult<SealedChunk>> = batch
                .par_iter()
                .map(|(index, is_final, plaintext)| cipher.seal(*index, *is_final, plaintext))
                .collect();
            for chunk in sealed {
                let chunk = chunk?;
                chunk.write_to(output)?;
                summary.record(&chunk);
            }
            trace!(chunks = summary.chunks, bytes = summary.plaintext_bytes, "sealed batch");

            if finished {
                break;
            }
        }

        output.flush()?;
        debug!(
            chunks = summary.chunks,
            plaintext_bytes = summary.plaintext_bytes,
            ciphertext_bytes = summary.ciphertext_bytes,
            "stream encrypted"
        );
        Ok(summary)
    }

    fn run_decrypt<R: Read, W: Write>(
        &mut self,
        input: &mut R,
        output: &mut W,
        password: &SecretString,
    ) -> StreamResult<StreamSummary> {
        let header = Header::read_from(input)?;
        self.advance(Stage::HeaderHandled);

        let chunk_size = header.chunk_size();
        let batch_len = self.config.batch_len();
        debug!(
            chunk_size,
            workers = batch_len,
            mem_cost_kib = header.kdf.mem_cost_kib,
            time_cost = header.kdf.time_cost,
            "decrypting stream"
        );

        let cipher = {
            let key = derive_key(password, &header.salt, &header.kdf)?;
            ChunkCipher::new(&key, &header)
        };

        let mut summary = StreamSummary {
            ciphertext_bytes: HEADER_LEN as u64,
            ..StreamSummary::default()
        };
        self.advance(Stage::Streaming);

        let mut next_index = 0u64;
        loop {
            self.check_cancelled()?;

            // A structural fault is held back until the chunks read before it
            // have been verified, so the earliest failure wins.
            let mut batch = Vec::with_capacity(batch_len);
            let mut fault = None;
            let mut finished = false;
            while batch.len() < batch_len {
                match SealedChunk::read_from(input, next_index, chunk_size) {
                    Ok(Some(chunk)) => {
                        next_index += 1;
                        finished = chunk.is_final;
                        batch.push(chunk);
                        if finished {
                            break;
                        }
                    }
                    Ok(None) => {
                        fault = Some(StreamError::from(IntegrityFault::MissingFinalChunk {
                            chunks: next_index,
                        }));
                        break;
                    }
                    Err(e) => {
                        fault = Some(e);
                        break;
                    }
                }
            }

            let opened: Vec<StreamResult<Zeroizing<Vec<u8>>>> =
                batch.par_iter().map(|chunk| cipher.open(chunk)).collect();
            for (chunk, plaintext) in batch.iter().zip(opened) {
                let plaintext = plaintext?;
                output.write_all(&plaintext)?;
                summary.record(chunk);
            }
            trace!(chunks = summary.chunks, bytes = summary.plaintext_bytes, "opened batch");

            if let Some(fault) = fault {
                return Err(fault);
            }
            if finished {
                let mut probe = [0u8; 1];
                if read_full(input, &mut probe)? != 0 {
                    return Err(IntegrityFault::TrailingData.into());
                }
                break;
            }
        }

        output.flush()?;
        debug!(
            chunks = summary.chunks,
            plaintext_bytes = summary.plaintext_bytes,
            "stream decrypted"
        );
        Ok(summary)
    }

    fn conclude(&mut self, result: StreamResult<StreamSummary>) -> StreamResult<StreamSummary> {
        match &result {
            Ok(_) => self.advance(Stage::Finished),
            Err(e) => {
                debug!(kind = ?e.kind(), error = %e, "stream operation failed");
                self.advance(Stage::Failed(e.kind()));
            }
        }
        result
    }

    fn advance(&mut self, next: Stage) {
        trace!(from = ?self.stage, to = ?next, "stage transition");
        self.stage = next;
    }

    fn check_cancelled(&self) -> StreamResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        Ok(())
    }
}

/// Encrypt with default parameters.
pub fn encrypt_stream<R: Read, W: Write>(
    input: R,
    output: W,
    password: &SecretString,
) -> StreamResult<StreamSummary> {
    StreamEngine::new(StreamConfig::default()).encrypt(input, output, password)
}

/// Decrypt any stream produced by this crate, whatever parameters it used.
pub fn decrypt_stream<R: Read, W: Write>(
    input: R,
    output: W,
    password: &SecretString,
) -> StreamResult<StreamSummary> {
    StreamEngine::new(StreamConfig::default()).decrypt(input, output, password)
}

/// Read up to one chunk of plaintext; shorter only at end of input.
fn read_chunk<R: Read>(input: &mut R, chunk_size: usize) -> StreamResult<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(vec![0u8; chunk_size]);
    let n = read_full(input, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}
