//! Error taxonomy for link/relay operations.
//!
//! Everything except `Storage` is a caller-recoverable condition (re-scan a
//! code, reconnect, re-link). `Storage` is the hard-failure class: a poisoned
//! or unavailable store propagates out of the operation instead of silently
//! dropping a message.

use thiserror::Error;

pub type LinkerResult<T> = Result<T, LinkerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkerError {
    /// Unknown code, link, token, or session.
    #[error("not found")]
    NotFound,

    /// Link code past its expiry window.
    #[error("code expired")]
    Expired,

    /// Single-use link code replayed. Closes the double-link race: of two
    /// devices scanning the same code, exactly one wins.
    #[error("code already consumed")]
    AlreadyConsumed,

    /// Call attempted without an established link.
    #[error("not linked")]
    NotLinked,

    /// Operation on a link or token the caller does not own.
    #[error("unauthorized")]
    Unauthorized,

    /// Backing store unavailable or poisoned.
    #[error("storage: {0}")]
    Storage(String),
}

impl LinkerError {
    pub(crate) fn lock(what: &str) -> Self {
        LinkerError::Storage(format!("{what} lock"))
    }
}
