//! Deliverable assembly.
//!
//! Rendered units are merged into one bookmarked PDF and packed into one EPUB,
//! both inside the run's scratch directory. Nothing leaves scratch until both
//! files have been read back and checked against the units they came from;
//! [`publish`] then moves the pair into the output directory.

mod epub;
pub mod error;
pub mod inspect;
mod pdf;
mod publish;

use crate::error::{ErrorKind, Result};
use lectern_extract::{Fragment, is_xml_char};
use lectern_package::Package;
use std::path::{Path, PathBuf};
use tracing::instrument;

pub use crate::publish::{Published, PublishedFile, publish};

/// One content page after rendering: a PDF in scratch plus its EPUB fragment.
#[derive(Debug, Clone)]
pub struct RenderedUnit {
    /// Position among the subject's content pages, from zero.
    pub index: usize,
    /// Manifest resource id.
    pub id: String,
    /// Resolved section title.
    pub title: String,
    pub pdf: PathBuf,
    pub fragment: Fragment,
}

/// EPUB metadata that does not come from the subject itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpubOptions {
    /// BCP 47 language tag.
    pub language: String,
    /// `dcterms:modified`, as a UTC timestamp ending in `Z`.
    pub modified: String,
}
impl Default for EpubOptions {
    fn default() -> Self {
        Self { language: "es".to_string(), modified: "2000-01-01T00:00:00Z".to_string() }
    }
}

/// Both deliverables of a subject, built and verified, still in scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub pdf: PathBuf,
    pub epub: PathBuf,
    /// Total number of pages in the merged PDF.
    pub pages: usize,
    /// Number of sections (bookmarks, chapters).
    pub sections: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Assembler {
    epub: EpubOptions,
}
impl Assembler {
    pub fn new(epub: EpubOptions) -> Self {
        Self { epub }
    }

    /// Builds and verifies the PDF and the EPUB for `subject` in `workdir`.
    ///
    /// `units` must hold exactly one unit per content resource, in manifest
    /// order; `expected` is the number of content resources. `package` is
    /// read again for the files the EPUB embeds.
    #[instrument(skip_all, fields(subject = subject, units = units.len()))]
    pub fn assemble(
        &self,
        subject: &str,
        expected: usize,
        units: &[RenderedUnit],
        package: &mut Package,
        workdir: &Path,
    ) -> Result<Assembly> {
        ensure_complete(expected, units)?;
        let sections: Vec<Section<'_>> = units.iter().map(Section::from).collect();

        let pdf = workdir.join("deliverable.pdf");
        let page_counts = pdf::merge(subject, units, &sections, &pdf)?;
        let pages = page_counts.iter().sum();
        tracing::debug!(pages, "PDF merged");

        let epub = workdir.join("deliverable.epub");
        epub::write(subject, units, &sections, package, &self.epub, &epub)?;
        tracing::debug!("EPUB written");

        let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
        inspect::Pdf::open(&pdf)?.verify(&titles)?;
        inspect::Epub::open(&epub)?.verify(&titles)?;
        tracing::info!(pages, sections = units.len(), "Deliverables assembled");
        Ok(Assembly { pdf, epub, pages, sections: units.len() })
    }
}

/// Title and id of one section, as both deliverables show them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Section<'a> {
    pub(crate) id: &'a str,
    /// Control characters and anything XML cannot carry removed, so the PDF
    /// outline and the EPUB navigation show the same text.
    pub(crate) title: String,
}
impl<'a> From<&'a RenderedUnit> for Section<'a> {
    fn from(unit: &'a RenderedUnit) -> Self {
        let title = unit.title.chars().filter(|&c| !c.is_control() && is_xml_char(c)).collect();
        Self { id: &unit.id, title }
    }
}

fn ensure_complete(expected: usize, units: &[RenderedUnit]) -> Result<()> {
    for index in 0..expected {
        if units.get(index).is_none_or(|unit| unit.index != index) {
            exn::bail!(ErrorKind::MissingUnit { index, expected });
        }
    }
    if units.len() > expected {
        exn::bail!(ErrorKind::Verification(format!("{} rendered units for {expected} content resources", units.len())));
    }
    Ok(())
}
