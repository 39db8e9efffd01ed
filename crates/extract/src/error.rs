//! Extraction Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes declared as a page are not text markup (an image or a PDF
    /// listed as content, for instance).
    #[display("not a markup document: {_0}")]
    NotMarkup(#[error(not(source))] String),
    /// The streaming rewriter gave up on the document.
    #[display("could not rewrite markup: {_0}")]
    Rewrite(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // The markup is either usable or it's not.
        false
    }
}
