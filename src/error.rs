//! Process-boundary errors.
//!
//! Nothing *inside* a simulation run is fatal — a missing mask falls back
//! to the analytic model, FIFO overflow becomes bypass mode, a full
//! prefetch table forces an eviction. The only failures that abort the
//! process happen at the CLI/config/I-O boundary, collected here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("malformed TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("malformed mask archive {path}: {reason}")]
    MaskCorrupt { path: String, reason: String },
}
