//! Host-side error types.

use crate::bridge::BridgeError;
use crate::loader::LoadError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] modstage_protocol::ManifestError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Mod error: {0}")]
    Mod(String),
}
