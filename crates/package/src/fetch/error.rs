//! Fetch Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The locator is neither an `http(s)://` URL, a `file://` URL nor an
    /// absolute path.
    #[display("unsupported package locator: {_0}")]
    UnsupportedLocator(#[error(not(source))] String),
    /// The server answered with a non-success status.
    #[display("server responded with HTTP {_0}")]
    Status(#[error(not(source))] u16),
    /// DNS, connection, TLS or read failure.
    #[display("network error")]
    Network,
    /// The package is larger than the memory ceiling, either as declared
    /// up-front or as observed while reading.
    #[display("package exceeds the {limit}-byte memory ceiling")]
    TooLarge { limit: u64 },
    /// A local package file does not exist.
    #[display("package file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// A local package file exists but could not be read.
    #[display("could not read package file: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network | Self::Io(_) => true,
            Self::Status(code) => *code == 408 || *code == 429 || *code >= 500,
            _ => false,
        }
    }
}
