//! Assembly Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An assembly error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for assembly operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A content resource has no rendered unit; assembly never starts on a
    /// partial set.
    #[display("content resource {} of {expected} was never rendered", index + 1)]
    MissingUnit {
        #[error(not(source))]
        index: usize,
        #[error(not(source))]
        expected: usize,
    },
    #[display("rendered unit {id} has no pages")]
    EmptyUnit {
        #[error(not(source))]
        index: usize,
        #[error(not(source))]
        id: String,
    },
    /// A built deliverable does not describe the subject it was built from.
    #[display("deliverable verification failed: {_0}")]
    Verification(#[error(not(source))] String),
    #[display("unusable PDF: {}", _0.display())]
    Pdf(#[error(not(source))] PathBuf),
    #[display("could not build EPUB")]
    Epub,
    #[display("I/O error at {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// Moving a finished deliverable into the output directory failed.
    #[display("could not publish {}", _0.display())]
    Publish(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Publish(_))
    }
}
