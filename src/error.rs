//! Error kinds exposed to callers of this driver.

use thiserror::Error;

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum NetfrontError {
    /// Any unanticipated failure; `detail` is a human-readable description.
    #[error("unknown: {0}")]
    Unknown(String),

    /// Operation recognized but unsupported in the current build.
    #[error("unimplemented")]
    Unimplemented,

    /// Device previously connected has since been removed.
    #[error("disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, NetfrontError>;
