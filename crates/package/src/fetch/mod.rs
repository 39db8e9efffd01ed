//! Fetching a package into memory.
//!
//! A fetch either yields the complete archive as a [`PackageBuffer`] or fails;
//! partial buffers are never returned and nothing is written to disk.

pub mod error;
mod file;
mod http;

pub use self::file::FileFetcher;
pub use self::http::HttpFetcher;

use crate::fetch::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// The raw bytes of one subject's package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageBuffer {
    bytes: Vec<u8>,
}
impl PackageBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Anything that can turn a package locator into a package buffer.
pub trait PackageSource {
    fn fetch(&self, locator: &str) -> Result<PackageBuffer>;
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Memory ceiling for one package, in bytes.
    pub max_bytes: u64,
    pub user_agent: String,
    pub referer: Option<String>,
    /// Connect and per-read socket timeout.
    pub timeout: Duration,
}
impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024 * 1024,
            user_agent: concat!("lectern/", env!("CARGO_PKG_VERSION")).to_string(),
            referer: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Dispatches on the locator's scheme: `http(s)://` goes over the network,
/// `file://` URLs and absolute paths are read from the local filesystem.
pub struct Fetcher {
    http: HttpFetcher,
    file: FileFetcher,
}
impl Fetcher {
    pub fn new(options: &FetchOptions) -> Self {
        Self { http: HttpFetcher::new(options), file: FileFetcher::new(options.max_bytes) }
    }
}
impl PackageSource for Fetcher {
    fn fetch(&self, locator: &str) -> Result<PackageBuffer> {
        let unsupported = || ErrorKind::UnsupportedLocator(locator.to_string());
        if Path::new(locator).is_absolute() {
            return self.file.fetch_path(Path::new(locator));
        }
        let url = Url::parse(locator).or_raise(unsupported)?;
        match url.scheme() {
            "http" | "https" => self.http.fetch_url(url),
            "file" => {
                let path = url.to_file_path().map_err(|()| exn::Exn::from(unsupported()))?;
                self.file.fetch_path(&path)
            },
            _ => exn::bail!(unsupported()),
        }
    }
}

/// Reads at most `limit` bytes; one byte more means the source is over the
/// ceiling, whatever it declared.
fn read_capped(reader: impl Read, size_hint: u64, limit: u64, on_io: impl Fn() -> ErrorKind) -> Result<PackageBuffer> {
    let mut bytes = Vec::with_capacity(usize::try_from(size_hint.min(limit)).unwrap_or_default());
    reader.take(limit.saturating_add(1)).read_to_end(&mut bytes).or_raise(on_io)?;
    if bytes.len() as u64 > limit {
        exn::bail!(ErrorKind::TooLarge { limit });
    }
    Ok(PackageBuffer::new(bytes))
}
