//! Render Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A render error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for render operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("chrome/chromium not detected on your system")]
    ChromeNotFound,
    /// Chrome exited with a non-zero exit code. `-1` means it was killed by a
    /// signal and never reported one.
    #[display("Chrome exited with code: {_0}")]
    ChromeFailed(#[error(not(source))] i32),
    /// Chrome reported success but left no PDF, or an empty one.
    #[display("Chrome produced no output at {}", _0.display())]
    EmptyOutput(#[error(not(source))] PathBuf),
    /// Asset was not loadable (either file or builtin).
    #[display("style asset not found: {_0}")]
    AssetNotFound(#[error(not(source))] String),
    /// The page could not be turned into a document.
    #[display("unusable markup in {_0}")]
    Markup(#[error(not(source))] String),
    #[display("I/O error while rendering")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChromeFailed(_) | Self::EmptyOutput(_) | Self::Io)
    }
}
