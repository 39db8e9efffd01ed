//! Manifest Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A manifest error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for manifest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// [`UnknownSubject`](ErrorKind::UnknownSubject) and
/// [`EmptySubject`](ErrorKind::EmptySubject) are usage errors: the manifest is
/// fine, the caller asked for something it does not describe.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The manifest file does not exist.
    #[display("manifest not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The manifest file exists but could not be read.
    #[display("could not read manifest: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// The manifest is not valid JSON, or does not follow the schema.
    #[display("malformed manifest")]
    Malformed,
    /// A subject name is not canonical (blank, padded, or contains separators).
    #[display("invalid subject name: {_0:?}")]
    InvalidSubjectName(#[error(not(source))] String),
    /// A subject entry is structurally valid JSON but semantically unusable.
    #[display("invalid entry for subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: String },
    /// The requested subject is not a key of the manifest.
    #[display("subject '{_0}' is not listed in the manifest")]
    UnknownSubject(#[error(not(source))] String),
    /// The requested subject has no content pages to convert.
    #[display("subject '{_0}' has no content resources")]
    EmptySubject(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Returns `true` if the error stems from how the program was invoked
    /// rather than from the manifest itself.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::UnknownSubject(_) | Self::EmptySubject(_))
    }
}
