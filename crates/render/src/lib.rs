//! Per-page rendering.
//!
//! A content page is turned into two things: a PDF printed by a
//! [`PageRenderer`] into the run's scratch directory, and an XHTML
//! [`Fragment`] produced by a [`FragmentConverter`] for the EPUB. Both engines
//! sit behind traits so the pipeline can be driven by something other than a
//! real browser.

mod chrome;
mod convert;
pub mod error;
mod process;
mod render;
mod style;

use crate::error::Result;
use std::path::Path;

pub use crate::chrome::ChromeOptions;
pub use crate::convert::XhtmlConverter;
pub use crate::process::Processes;
pub use crate::render::ChromeRenderer;
pub use crate::style::{CssVariables, StyleConfig};
pub use lectern_extract::{Assets, Fragment};

pub type TempFile = tempfile::NamedTempFile;

/// One content page and everything it embeds.
#[derive(Debug, Clone)]
pub struct PageSource {
    /// Position among the subject's content pages, from zero.
    pub index: usize,
    pub subject: String,
    /// Manifest resource id.
    pub id: String,
    /// Normalized path of the page inside the package.
    pub path: String,
    /// Section title, already resolved (see [`section_title`]).
    pub title: String,
    pub markup: Vec<u8>,
    /// Package members the page references, by normalized path.
    pub assets: Assets,
}
impl PageSource {
    pub fn css_variables(&self) -> CssVariables {
        [
            ("subject", self.subject.clone()),
            ("title", self.title.clone()),
            ("index", (self.index + 1).to_string()),
        ]
        .into_iter()
        .collect()
    }
}

/// Prints one page to a PDF file.
pub trait PageRenderer {
    /// Writes exactly one PDF at `save_to`. Any other file the engine needs
    /// lives next to it and is gone when this returns.
    fn render(&self, source: &PageSource, save_to: &Path) -> Result<()>;
}

/// Converts one page to an EPUB-ready fragment.
pub trait FragmentConverter {
    fn convert(&self, source: &PageSource) -> Result<Fragment>;
}

/// Title shown in bookmarks and the table of contents.
///
/// The manifest title wins; a blank one falls back to the page's own
/// `<title>`, then to a numbered placeholder.
pub fn section_title(manifest_title: &str, document_title: Option<&str>, index: usize) -> String {
    let manifest_title = manifest_title.trim();
    if !manifest_title.is_empty() {
        return manifest_title.to_string();
    }
    match document_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => title.to_string(),
        None => format!("Section {}", index + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Intro", Some("Ignored"), 0, "Intro")]
    #[case("  Intro  ", None, 0, "Intro")]
    #[case("", Some("Las células"), 1, "Las células")]
    #[case(" ", Some("  "), 2, "Section 3")]
    #[case("", None, 0, "Section 1")]
    fn resolves_titles(
        #[case] manifest: &str,
        #[case] document: Option<&str>,
        #[case] index: usize,
        #[case] expected: &str,
    ) {
        assert_eq!(section_title(manifest, document, index), expected);
    }
}
