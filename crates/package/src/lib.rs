//! Getting a subject's package into memory and reading it from there.
//!
//! [`fetch`] turns a locator into a [`PackageBuffer`](fetch::PackageBuffer);
//! [`archive`] opens that buffer as a zip and hands out members on demand.
//! The two never write to disk.

pub mod archive;
pub mod fetch;
pub mod path;

pub use crate::archive::{ArchiveEntry, EntryInfo, Package};
pub use crate::fetch::{FetchOptions, Fetcher, PackageBuffer, PackageSource};
