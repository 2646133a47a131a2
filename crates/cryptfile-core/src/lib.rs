pub mod config;
pub mod error;

pub use config::{CryptfileConfig, CryptoConfig, LogConfig, LogFormat};
pub use error::{CryptfileError, CryptfileResult};
