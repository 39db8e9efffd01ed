//! CSS style management for rendered pages.
//!
//! Styles are assembled through [`StyleConfig`]'s builder API, combining
//! compile-time embedded builtins (see [`StyleConfig::list_builtins`]) with
//! user-provided files or raw CSS content. All styles are read eagerly at
//! construction time so that missing files fail fast rather than at render time.

mod assets;
mod variables;

pub use self::variables::CssVariables;
use crate::error::{ErrorKind, Result};
use crate::style::assets::Builtins;
use exn::ResultExt;
use std::borrow::Cow;
use std::io::Write;
use std::path::Path;

struct Style {
    /// `builtin:<name>` or the file path, for logs.
    origin: String,
    content: Cow<'static, [u8]>,
}
impl Style {
    fn write_all_to(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_all(b"<style>")?;
        w.write_all(&self.content)?;
        w.write_all(b"</style>\n")
    }
}

/// An ordered collection of CSS stylesheets to inject into rendered pages.
///
/// Styles are applied in insertion order, later styles overriding earlier
/// ones. Page styles come first in the document, so injected styles win over
/// the package's own CSS at equal specificity.
///
/// # Example
///
/// ```no_run
/// use lectern_render::StyleConfig;
/// # use lectern_render::error::Result;
///
/// # fn get_styles() -> Result<StyleConfig> {
/// let styles = StyleConfig::new()
///     .with_builtin("print.css")?
///     .with_file("/path/to/custom.css")?;
/// # Ok(styles)
/// # }
/// ```
#[derive(Default)]
pub struct StyleConfig {
    styles: Vec<Style>,
}
impl StyleConfig {
    /// Creates an empty style configuration with no stylesheets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builtins by name, then user files, in the given order.
    pub fn from_names_and_files<N, P>(builtins: &[N], files: &[P]) -> Result<Self>
    where
        N: AsRef<str>,
        P: AsRef<Path>,
    {
        let styles = builtins.iter().try_fold(Self::new(), |styles, name| styles.with_builtin(name))?;
        files.iter().try_fold(styles, |styles, path| styles.with_file(path))
    }

    /// Returns the names of all embedded builtin stylesheets (e.g. `"print.css"`).
    pub fn list_builtins() -> Vec<Cow<'static, str>> {
        Builtins::list()
    }

    /// Appends a builtin stylesheet by name.
    ///
    /// Returns [`ErrorKind::AssetNotFound`] if `name` does not match any
    /// embedded asset.
    pub fn with_builtin(mut self, name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        let content = Builtins::load(name)?;
        self.styles.push(Style { origin: Builtins::identifier(name), content });
        Ok(self)
    }

    /// Appends a stylesheet read from a file on disk.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            exn::bail!(ErrorKind::AssetNotFound(path.display().to_string()));
        }
        let content = std::fs::read(path).or_raise(|| ErrorKind::Io)?;
        self.styles.push(Style { origin: path.display().to_string(), content: Cow::Owned(content) });
        Ok(self)
    }

    /// Appends raw CSS content as a stylesheet. This is infallible since no
    /// I/O is involved.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        let content: String = content.into();
        self.styles.push(Style { origin: "inline".into(), content: Cow::Owned(content.into_bytes()) });
        self
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    pub(crate) fn origins(&self) -> impl Iterator<Item = &str> {
        self.styles.iter().map(|s| s.origin.as_str())
    }

    pub(crate) fn write_all_to(&self, w: &mut impl Write) -> std::io::Result<usize> {
        for style in &self.styles {
            style.write_all_to(w)?;
        }
        Ok(self.styles.len())
    }
}
