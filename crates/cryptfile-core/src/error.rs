use std::path::PathBuf;

use thiserror::Error;

pub type CryptfileResult<T> = Result<T, CryptfileError>;

#[derive(Debug, Error)]
pub enum CryptfileError {
    #[error("reading config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config error: {0}")]
    Config(String),
}
