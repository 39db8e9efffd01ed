use clap::{ArgAction, Parser};
use lectern_config::Overrides;
use std::path::PathBuf;

/// Converts one subject's SCORM package into a bookmarked PDF and an EPUB.
#[derive(Debug, Parser)]
#[command(name = "lectern", version, about)]
pub struct Cli {
    /// Canonical subject name, as written in the manifest.
    #[arg(required_unless_present = "list")]
    pub subject: Option<String>,

    /// List the subjects in the manifest and exit.
    #[arg(long, conflicts_with = "subject")]
    pub list: bool,

    /// Configuration file (TOML, YAML or JSON), layered over the defaults.
    #[arg(short, long, env = "LECTERN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Manifest Store to read subjects from.
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Directory deliverables are published to.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Directory per-run scratch directories are created in.
    #[arg(long)]
    pub scratch_root: Option<PathBuf>,

    /// More log output; repeat for more.
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Less log output; repeat for less.
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,
}
impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            manifest: self.manifest.clone(),
            output_dir: self.output_dir.clone(),
            scratch_root: self.scratch_root.clone(),
        }
    }

    /// Shift applied to the configured log level.
    pub fn verbosity(&self) -> i8 {
        self.verbose.min(4) as i8 - self.quiet.min(4) as i8
    }
}
