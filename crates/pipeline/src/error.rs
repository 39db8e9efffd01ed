//! Pipeline Error Types
//!
//! One variant per stage of a run. The stage's own error is kept as the
//! child of the raised one, so the full tree says both where the run stopped
//! and why.

use derive_more::{Display, Error};

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The scratch directory could not be created, swept or removed.
    #[display("scratch directory unavailable")]
    Scratch,
    /// The output template did not compile, or rendered an unusable path.
    #[display("issue with output name generation from template")]
    Template,
    #[display("could not fetch the subject's package")]
    Fetch,
    /// The package is unreadable or does not match the manifest.
    #[display("package does not match the manifest")]
    Archive,
    #[display("rendering failed at resource {} of {total} ({id}: {title})", index + 1)]
    Render {
        #[error(not(source))]
        index: usize,
        #[error(not(source))]
        total: usize,
        #[error(not(source))]
        id: String,
        #[error(not(source))]
        title: String,
    },
    #[display("could not assemble the deliverables")]
    Assembly,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Only the stage is known here; the child error in the tree has the
    /// details.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch | Self::Render { .. })
    }
}
