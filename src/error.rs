//! Error classification surfaced to callers of [`crate::Core::extract`].
//!
//! Local recovery (transport retries, session refresh on session-invalid
//! errno, mirror rotation on captcha errno, ladder rungs failing in
//! sequence) is never surfaced — these variants are reached only once every
//! avenue of recovery is exhausted.

use crate::core::types::HostError;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The input URL did not match any known Host pattern, or matched but
    /// yielded no non-empty surl.
    #[error("not a recognized share URL: {0}")]
    InvalidUrl(String),

    /// The share exists but its file list is empty.
    #[error("share has no files")]
    NoFilesFound,

    /// The file list is non-empty but the Stage 4 ladder was exhausted
    /// without producing a playable URL.
    #[error("no playable video found in share")]
    NoVideoFound,

    /// The Host returned an application-level error the core could not
    /// locally recover from.
    #[error(transparent)]
    Host(#[from] HostError),

    /// All transport retries were exhausted.
    #[error("transport error: {0}")]
    Transport(String),

    /// The per-call deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// `extract` was called after [`crate::Core::close`].
    #[error("extraction core is closed")]
    Closed,
}

impl From<reqwest::Error> for ExtractError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExtractError::Timeout
        } else {
            ExtractError::Transport(e.to_string())
        }
    }
}
