//! Scoped scratch directories.
//!
//! Every run works inside its own `<root>/<subject-slug>.<random>` directory.
//! It is removed when the [`Scratch`] handle is released or dropped, by the
//! signal handler if the process is interrupted, and, should the process die
//! without doing either, by the next run of the same subject.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use lectern_render::Processes;
use rslug::slugify;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::TempDir;
use tracing::instrument;

/// Records which process and subject a scratch directory belongs to.
const OWNER_FILE: &str = "owner";

/// Exit status after an interrupt, as shells report SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

type Registry = Arc<Mutex<BTreeSet<PathBuf>>>;

/// Hands out scratch directories and keeps track of the live ones, so an
/// interrupt can remove them before the process exits.
#[derive(Debug, Clone, Default)]
pub struct Janitor {
    live: Registry,
    processes: Processes,
}
impl Janitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child processes that may be writing into a scratch directory. They are
    /// killed before any directory is removed.
    pub fn with_processes(mut self, processes: Processes) -> Self {
        self.processes = processes;
        self
    }

    /// Installs a SIGINT/SIGTERM handler that runs [`cleanup`](Self::cleanup),
    /// then exits with status 130.
    ///
    /// A process can install one handler only; a second call fails.
    pub fn install_signal_handler(&self) -> Result<()> {
        let janitor = self.clone();
        ctrlc::set_handler(move || {
            janitor.cleanup();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        })
        .or_raise(|| ErrorKind::Scratch)
    }

    /// Kills the registered child processes, then removes every live scratch
    /// directory. Handles already given out stay valid but point nowhere.
    pub fn cleanup(&self) {
        let killed = self.processes.kill_all();
        let paths = std::mem::take(&mut *self.lock());
        for path in &paths {
            _ = std::fs::remove_dir_all(path);
        }
        tracing::debug!(killed, removed = paths.len(), "Interrupted run cleaned up");
    }

    /// Creates a fresh scratch directory for `subject` under `root`, after
    /// removing the leftovers of dead runs of the same subject.
    #[instrument(skip_all, fields(root = %root.display(), subject = subject))]
    pub fn acquire(&self, root: &Path, subject: &str) -> Result<Scratch> {
        std::fs::create_dir_all(root).or_raise(|| ErrorKind::Scratch)?;
        let prefix = format!("{}.", slug(subject));
        sweep(root, &prefix, subject);
        let dir =
            tempfile::Builder::new().prefix(&prefix).rand_bytes(8).tempdir_in(root).or_raise(|| ErrorKind::Scratch)?;
        let owner = format!("{}\n{subject}\n", std::process::id());
        std::fs::write(dir.path().join(OWNER_FILE), owner).or_raise(|| ErrorKind::Scratch)?;
        self.lock().insert(dir.path().to_path_buf());
        tracing::debug!(path = %dir.path().display(), "Scratch acquired");
        Ok(Scratch { dir: Some(dir), live: Arc::clone(&self.live) })
    }

    /// Number of scratch directories currently handed out.
    pub fn live(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<PathBuf>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A run's private working directory. Removed on [`release`](Self::release)
/// or drop, whichever comes first.
#[derive(Debug)]
pub struct Scratch {
    dir: Option<TempDir>,
    live: Registry,
}
impl Scratch {
    pub fn path(&self) -> &Path {
        self.dir.as_ref().map(TempDir::path).unwrap_or(Path::new(""))
    }

    /// Where the `index`th content page (from zero) is printed to.
    pub fn unit_pdf(&self, index: usize) -> PathBuf {
        self.path().join(format!("{:03}.pdf", index + 1))
    }

    /// Removes the directory, reporting failure instead of ignoring it.
    pub fn release(mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else { return Ok(()) };
        self.forget(dir.path());
        let path = dir.path().to_path_buf();
        dir.close().or_raise(|| ErrorKind::Scratch)?;
        tracing::debug!(path = %path.display(), "Scratch released");
        Ok(())
    }

    fn forget(&self, path: &Path) {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).remove(path);
    }
}
impl Drop for Scratch {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            self.forget(dir.path());
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                tracing::warn!(path = %path.display(), error = %err, "Could not remove scratch directory");
            }
        }
    }
}

fn slug(subject: &str) -> String {
    let slug = slugify!(subject);
    if slug.is_empty() { "subject".to_string() } else { slug }
}

/// Removes directories under `root` left behind by dead runs of `subject`.
///
/// Directories of other subjects, of live processes, or without a readable
/// owner record are left alone.
fn sweep(root: &Path, prefix: &str, subject: &str) {
    let Ok(entries) = std::fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if !entry.file_name().to_string_lossy().starts_with(prefix) || !path.is_dir() {
            continue;
        }
        let Some((pid, owner)) = read_owner(&path) else { continue };
        if owner != subject || is_alive(pid) {
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => tracing::info!(path = %path.display(), pid, "Removed scratch directory of a dead run"),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Could not remove stale scratch directory");
            },
        }
    }
}

fn read_owner(dir: &Path) -> Option<(u32, String)> {
    let content = std::fs::read_to_string(dir.join(OWNER_FILE)).ok()?;
    let mut lines = content.lines();
    let pid = lines.next()?.trim().parse().ok()?;
    Some((pid, lines.next()?.to_string()))
}

/// Without `/proc` there is no cheap way to tell, so every owner is assumed
/// to be alive.
fn is_alive(pid: u32) -> bool {
    let proc = Path::new("/proc");
    pid == std::process::id() || !proc.is_dir() || proc.join(pid.to_string()).exists()
}
