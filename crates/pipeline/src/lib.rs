//! One subject, end to end.
//!
//! A [`Pipeline`] fetches the subject's package, renders its content pages in
//! manifest order inside a private [`Scratch`] directory, assembles and
//! verifies the PDF and EPUB, then publishes both under a name produced by
//! the [`OutputNamer`].

pub mod error;
mod naming;
mod run;
pub mod scratch;

pub use crate::naming::{DEFAULT_TEMPLATE, OutputNamer};
pub use crate::run::{Pipeline, RunReport, Settings};
pub use crate::scratch::{INTERRUPTED_EXIT_CODE, Janitor, Scratch};
