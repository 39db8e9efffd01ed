//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The buffer is not a readable zip archive, or one of its members is
    /// corrupt (bad checksum, unsupported compression, encryption).
    #[display("malformed archive")]
    Malformed,
    /// The manifest declares a resource the package does not contain. The
    /// manifest is out of date with respect to the package.
    #[display("resource '{id}' is missing from the package: {path}")]
    MissingResource { id: String, path: String },
    /// A member was requested by a name the archive does not contain.
    #[display("no such archive entry: {_0}")]
    NotFound(#[error(not(source))] String),
    /// A member name is empty, contains null bytes or escapes the archive root.
    #[display("invalid archive path: {_0:?}")]
    InvalidPath(#[error(not(source))] String),
    /// An entry's uncompressed size exceeds the memory ceiling.
    #[display("archive entry '{name}' is larger than the {limit}-byte ceiling")]
    EntryTooLarge { name: String, limit: u64 },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
