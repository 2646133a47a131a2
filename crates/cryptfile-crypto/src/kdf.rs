//! Key derivation: Argon2id password → per-stream key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{StreamError, StreamResult};
use crate::{KEY_SIZE, SALT_SIZE};

/// Upper bound on memory cost (4 GiB) accepted from a header or config.
pub const MAX_MEM_COST_KIB: u32 = 4 * 1024 * 1024;
/// Upper bound on time cost accepted from a header or config.
pub const MAX_TIME_COST: u32 = 64;
/// Upper bound on lanes accepted from a header or config.
pub const MAX_PARALLELISM: u32 = 64;

/// A 256-bit stream key derived from a password via Argon2id.
///
/// Zeroized on drop; only ever lives for one stream operation.
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id parameters, recorded in every header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Reject parameters outside the accepted work-factor window.
    pub fn validate(&self) -> StreamResult<()> {
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(StreamError::InvalidKdfParams(format!(
                "time cost {} outside 1..={MAX_TIME_COST}",
                self.time_cost
            )));
        }
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(StreamError::InvalidKdfParams(format!(
                "parallelism {} outside 1..={MAX_PARALLELISM}",
                self.parallelism
            )));
        }
        let min_mem = 8 * self.parallelism;
        if self.mem_cost_kib < min_mem || self.mem_cost_kib > MAX_MEM_COST_KIB {
            return Err(StreamError::InvalidKdfParams(format!(
                "memory cost {} KiB outside {min_mem}..={MAX_MEM_COST_KIB}",
                self.mem_cost_kib
            )));
        }
        Ok(())
    }
}

/// Derive a 256-bit key from a password and salt using Argon2id.
///
/// Deterministic in all three inputs. The salt is random per stream and
/// stored in the header (it does not need to be secret).
pub fn derive_key(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> StreamResult<DerivedKey> {
    params.validate()?;

    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| StreamError::InvalidKdfParams(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = DerivedKey::from_bytes([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key.bytes)
        .map_err(|e| StreamError::InvalidKdfParams(format!("Argon2id KDF failed: {e}")))?;

    Ok(key)
}
