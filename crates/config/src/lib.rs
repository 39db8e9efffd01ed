//! Layered configuration for lectern.
//!
//! Values are merged from lowest to highest precedence:
//!
//! 1. built-in defaults ([`Config::default`]),
//! 2. the user configuration directory (`config.toml`, `config.yaml` or
//!    `config.json`, e.g. `~/.config/lectern/` on Linux),
//! 3. `lectern.toml` in the working directory,
//! 4. an explicit file passed with [`Loader::with_file`],
//! 5. `LECTERN_*` environment variables, with `__` separating nested keys
//!    (`LECTERN_FETCH__MAX_PACKAGE_BYTES=1048576`),
//! 6. command-line [`Overrides`].
//!
//! The merged result is validated before it is returned, so a bad value fails
//! before any network or disk activity happens.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

const ENV_PREFIX: &str = "LECTERN_";
const LOCAL_FILE: &str = "lectern.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Path of the manifest JSON file.
    pub manifest: PathBuf,
    /// Where finished deliverables are published.
    pub output_dir: PathBuf,
    /// Parent of the per-run scratch directories.
    pub scratch_root: PathBuf,
    pub output: OutputConfig,
    pub fetch: FetchConfig,
    pub render: RenderConfig,
    pub epub: EpubConfig,
    pub log: LogConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("manifest.json"),
            output_dir: PathBuf::from("deliverables"),
            scratch_root: std::env::temp_dir().join("lectern"),
            output: OutputConfig::default(),
            fetch: FetchConfig::default(),
            render: RenderConfig::default(),
            epub: EpubConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// File stem template for both deliverables; `.pdf` and `.epub` are
    /// appended. Has access to `subject`, with `slug` and `truncate` helpers.
    pub template: String,
}
impl Default for OutputConfig {
    fn default() -> Self {
        Self { template: "{{ subject|slug }}".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Memory ceiling for one package. Checked against the declared size
    /// before allocating, and enforced while reading.
    pub max_package_bytes: u64,
    pub user_agent: String,
    pub referer: Option<String>,
    /// Socket-level connect/read timeout. There is no overall deadline.
    pub timeout_secs: u64,
}
impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_package_bytes: 512 * 1024 * 1024,
            user_agent: concat!("lectern/", env!("CARGO_PKG_VERSION")).to_string(),
            referer: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Explicit Chrome/Chromium executable; discovered on `PATH` otherwise.
    pub chrome: Option<PathBuf>,
    /// Names of embedded stylesheets injected into every page.
    pub styles: Vec<String>,
    /// User stylesheets injected after the embedded ones.
    pub stylesheets: Vec<PathBuf>,
    /// Virtual time Chrome grants page scripts (MathJax and friends) before
    /// printing.
    pub virtual_time_budget_ms: u64,
    /// Block every network request made by pages during rendering.
    pub offline: bool,
    pub extra_args: Vec<String>,
}
impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            chrome: None,
            styles: vec!["print.css".to_string()],
            stylesheets: Vec::new(),
            virtual_time_budget_ms: 5_000,
            offline: true,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EpubConfig {
    /// BCP 47 language tag of the content.
    pub language: String,
    /// `dcterms:modified` of every EPUB, RFC 3339. Fixed so that reruns are
    /// byte-identical; normalized to `YYYY-MM-DDThh:mm:ssZ` on load.
    pub modified: String,
}
impl Default for EpubConfig {
    fn default() -> Self {
        Self {
            language: "es".to_string(),
            modified: "2000-01-01T00:00:00Z".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
}
impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::default() }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_root: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Loader {
    file: Option<PathBuf>,
    overrides: Overrides,
    user_dir: bool,
}
impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}
impl Loader {
    pub fn new() -> Self {
        Self { file: None, overrides: Overrides::default(), user_dir: true }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Skip the per-user configuration directory (tests, reproducible runs).
    pub fn without_user_dir(mut self) -> Self {
        self.user_dir = false;
        self
    }

    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if self.user_dir
            && let Some(dirs) = ProjectDirs::from("", "", "lectern")
        {
            let dir = dirs.config_dir();
            tracing::trace!(dir = %dir.display(), "Reading user configuration directory");
            figment = figment
                .merge(Toml::file(dir.join("config.toml")))
                .merge(Yaml::file(dir.join("config.yaml")))
                .merge(Json::file(dir.join("config.json")));
        }
        figment = figment.merge(Toml::file(LOCAL_FILE));
        if let Some(file) = &self.file {
            figment = figment.merge(Self::explicit_file(file)?);
        }
        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(&self.overrides)))
    }

    pub fn load(&self) -> Result<Config> {
        let config: Config = self.figment()?.extract().or_raise(|| ErrorKind::Invalid)?;
        config.validate()
    }

    /// Explicit files must exist; their format follows the extension.
    fn explicit_file(path: &Path) -> Result<Figment> {
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("yaml" | "yml") => Figment::from(Yaml::file(path)),
            Some("json") => Figment::from(Json::file(path)),
            _ => Figment::from(Toml::file(path)),
        })
    }
}

impl Config {
    /// Convenience for [`Loader::new().load()`](Loader::load).
    pub fn load() -> Result<Self> {
        Loader::new().load()
    }

    fn validate(mut self) -> Result<Self> {
        if self.fetch.max_package_bytes == 0 {
            exn::bail!(ErrorKind::Validation {
                field: "fetch.max_package_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        if self.epub.language.trim().is_empty() {
            exn::bail!(ErrorKind::Validation {
                field: "epub.language",
                reason: "must not be empty".into(),
            });
        }
        if self.output.template.trim().is_empty() {
            exn::bail!(ErrorKind::Validation {
                field: "output.template",
                reason: "must not be empty".into(),
            });
        }
        self.epub.modified = normalize_timestamp(&self.epub.modified)?;
        Ok(self)
    }
}

fn normalize_timestamp(value: &str) -> Result<String> {
    let invalid = || ErrorKind::Validation {
        field: "epub.modified",
        reason: format!("{value:?} is not an RFC 3339 timestamp"),
    };
    let parsed = OffsetDateTime::parse(value.trim(), &Rfc3339).or_raise(invalid)?;
    parsed
        .to_offset(time::UtcOffset::UTC)
        .format(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z"))
        .or_raise(invalid)
}
