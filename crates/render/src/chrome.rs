use crate::error::{ErrorKind, Result};
use crate::process::Processes;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::instrument;

/// How much of Chrome's stderr ends up in the logs on failure.
const STDERR_TAIL_BYTES: usize = 2048;

/// Knobs passed through to every Chrome invocation.
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    /// Explicit executable; discovered when `None`.
    pub executable: Option<PathBuf>,
    /// Virtual time granted to page scripts before printing.
    pub virtual_time_budget_ms: u64,
    /// Refuse every hostname lookup, so pages cannot reach the network.
    pub offline: bool,
    pub extra_args: Vec<String>,
}
impl Default for ChromeOptions {
    fn default() -> Self {
        Self { executable: None, virtual_time_budget_ms: 5_000, offline: true, extra_args: Vec::new() }
    }
}

/// Represents a Chrome/Chromium executable.
#[derive(Debug, Clone)]
pub(crate) enum Chrome {
    /// A directly executable binary.
    Binary { path: PathBuf },
    /// A Flatpak-installed application.
    Flatpak { flatpak: PathBuf, app_id: String },
}
impl Chrome {
    pub(crate) fn discover() -> Result<Self> {
        // Check for direct executables
        let executables = ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser", "chrome"];
        for exe in executables {
            if let Ok(path) = which::which(exe) {
                tracing::debug!(chrome = %path.display(), "Discovered Chrome executable");
                return Ok(Self::Binary { path });
            }
        }
        tracing::info!("Chrome executable not found in PATH");
        if let Ok(flatpak) = which::which("flatpak") {
            tracing::trace!(flatpak = %flatpak.display(), "Discovered Flatpak on system; searching installed apps");
            let flatpak_apps = ["com.google.Chrome", "org.chromium.Chromium"];
            for app_id in flatpak_apps {
                if Command::new(&flatpak).args(["info", app_id]).output().is_ok_and(|o| o.status.success()) {
                    return Ok(Self::Flatpak { flatpak, app_id: app_id.to_string() });
                }
            }
        } else {
            tracing::info!("Flatpak not found; skipping containerized Chrome checks.");
        }
        exn::bail!(ErrorKind::ChromeNotFound);
    }

    pub(crate) fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        // A bare name is looked up on PATH, like a shell would.
        let path = which::which(&path).or_raise(|| ErrorKind::ChromeNotFound)?;
        Ok(Self::Binary { path })
    }

    /// Prints `input` to `output`. Everything Chrome writes (profile, crash
    /// dumps) goes to a profile directory inside `workdir` that is removed
    /// before this returns.
    #[instrument(skip_all, fields(input = %input.display()))]
    pub(crate) fn execute(
        &self,
        input: &Path,
        output: &Path,
        workdir: &Path,
        options: &ChromeOptions,
        processes: &Processes,
    ) -> Result<()> {
        let profile = tempfile::Builder::new()
            .prefix(".chrome-profile-")
            .tempdir_in(workdir)
            .or_raise(|| ErrorKind::Io)?;
        let mut command = match self {
            Self::Binary { path } => Command::new(path),
            Self::Flatpak { flatpak, app_id } => {
                let mut command = Command::new(flatpak);
                command.arg("run").arg(format!("--filesystem={}", workdir.display())).arg(app_id);
                command
            },
        };
        command.args(self.arguments(input, output, profile.path(), options));
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
        let result = processes.output(&mut command).or_raise(|| ErrorKind::Io)?;
        if let Err(err) = profile.close() {
            tracing::warn!(error = %err, "Could not remove Chrome profile");
        }
        if !result.status.success() {
            let tail = String::from_utf8_lossy(&result.stderr[result.stderr.len().saturating_sub(STDERR_TAIL_BYTES)..]);
            tracing::error!(status = %result.status, stderr = %tail.trim(), "Chrome failed");
            exn::bail!(ErrorKind::ChromeFailed(result.status.code().unwrap_or(-1)));
        }
        match std::fs::metadata(output) {
            Ok(metadata) if metadata.len() > 0 => Ok(()),
            _ => exn::bail!(ErrorKind::EmptyOutput(output.to_path_buf())),
        }
    }

    fn arguments(&self, input: &Path, output: &Path, profile: &Path, options: &ChromeOptions) -> Vec<String> {
        let mut args: Vec<String> = [
            "--headless",
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--no-first-run",
            "--no-default-browser-check",
            "--no-pdf-header-footer",
            "--print-to-pdf-no-header",
            "--run-all-compositor-stages-before-draw",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.push(format!("--user-data-dir={}", profile.display()));
        args.push(format!("--crash-dumps-dir={}", profile.join("crashes").display()));
        args.push(format!("--virtual-time-budget={}", options.virtual_time_budget_ms));
        if options.offline {
            args.push("--host-resolver-rules=MAP * ~NOTFOUND".to_string());
        }
        args.extend(options.extra_args.iter().cloned());
        args.push(format!("--print-to-pdf={}", output.display()));
        args.push(input.display().to_string());
        args
    }
}
