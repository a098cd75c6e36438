use thiserror::Error;

/// Errors surfaced by the reliability core. Network-level plumbing
/// (the client/server binaries) wraps this in `anyhow` at the boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed datagram: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control channel error: {0}")]
    ControlChannel(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, Error>;
