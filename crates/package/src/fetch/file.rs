use crate::fetch::error::{ErrorKind, Result};
use crate::fetch::{PackageBuffer, PackageSource, read_capped};
use exn::ResultExt;
use std::fs::File;
use std::path::Path;
use tracing::instrument;

/// Reads packages from the local filesystem. Used for offline runs.
pub struct FileFetcher {
    limit: u64,
}
impl FileFetcher {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn fetch_path(&self, path: &Path) -> Result<PackageBuffer> {
        let io = || ErrorKind::Io(path.to_path_buf());
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => exn::Exn::from(ErrorKind::NotFound(path.to_path_buf())),
            _ => exn::Exn::from(e).raise(io()),
        })?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        if metadata.len() > self.limit {
            exn::bail!(ErrorKind::TooLarge { limit: self.limit });
        }
        let file = File::open(path).or_raise(io)?;
        let buffer = read_capped(file, metadata.len(), self.limit, io)?;
        tracing::info!(bytes = buffer.len(), "Package read from disk");
        Ok(buffer)
    }
}
impl PackageSource for FileFetcher {
    fn fetch(&self, locator: &str) -> Result<PackageBuffer> {
        self.fetch_path(Path::new(locator))
    }
}
