use crate::error::{ErrorKind, Result};
use crate::naming::OutputNamer;
use crate::scratch::{Janitor, Scratch};
use exn::ResultExt;
use lectern_assemble::{Assembler, EpubOptions, PublishedFile, RenderedUnit, publish};
use lectern_extract::{Assets, Fragment, Page, css, escape_xml};
use lectern_manifest::{Resource, SubjectRef};
use lectern_package::{Package, PackageSource};
use lectern_render::{FragmentConverter, PageRenderer, PageSource, section_title};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use tracing::instrument;

/// Content resources starting with this are merged as they are.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Everything a run needs besides its collaborators.
pub struct Settings {
    pub output_dir: PathBuf,
    pub scratch_root: PathBuf,
    pub namer: OutputNamer,
    /// Largest archive entry that may be decompressed into memory.
    pub max_entry_bytes: u64,
    pub epub: EpubOptions,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub subject: String,
    pub sections: usize,
    pub pages: usize,
    pub pdf: PublishedFile,
    pub epub: PublishedFile,
}
impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(f, "{}: {} sections, {} pages", self.subject, self.sections, self.pages)?;
        for file in [&self.pdf, &self.epub] {
            writeln!(f, "  {}  {} bytes  blake3:{}", file.path.display(), file.size, file.blake3)?;
        }
        Ok(())
    }
}

/// Converts one subject per [`run`](Self::run), end to end.
///
/// Content pages are rendered strictly in manifest order, one at a time. The
/// first failure ends the run; whatever was built so far is discarded with
/// the scratch directory, and nothing is published.
pub struct Pipeline<S, R, C> {
    settings: Settings,
    source: S,
    renderer: R,
    converter: C,
    assembler: Assembler,
    janitor: Janitor,
}
impl<S: PackageSource, R: PageRenderer, C: FragmentConverter> Pipeline<S, R, C> {
    pub fn new(settings: Settings, source: S, renderer: R, converter: C) -> Self {
        let assembler = Assembler::new(settings.epub.clone());
        Self { settings, source, renderer, converter, assembler, janitor: Janitor::new() }
    }

    /// Shares scratch bookkeeping with a janitor that has a signal handler
    /// installed.
    pub fn with_janitor(mut self, janitor: Janitor) -> Self {
        self.janitor = janitor;
        self
    }

    #[instrument(skip_all, fields(subject = subject.name()))]
    pub fn run(&self, subject: SubjectRef<'_>) -> Result<RunReport> {
        let total = subject.contents().count();
        let stem = self.settings.namer.generate(subject.name(), total)?;
        let scratch = self.janitor.acquire(&self.settings.scratch_root, subject.name())?;
        let report = self.run_in(subject, &scratch, &stem)?;
        if let Err(err) = scratch.release() {
            tracing::warn!(error = ?err, "Deliverables published, but scratch could not be removed");
        }
        tracing::info!(sections = report.sections, pages = report.pages, "Subject converted");
        Ok(report)
    }

    fn run_in(&self, subject: SubjectRef<'_>, scratch: &Scratch, stem: &str) -> Result<RunReport> {
        let buffer = self.source.fetch(subject.package()).or_raise(|| ErrorKind::Fetch)?;
        tracing::info!(bytes = buffer.len(), "Package fetched");
        let mut package = Package::open(buffer, self.settings.max_entry_bytes).or_raise(|| ErrorKind::Archive)?;
        package.verify(subject.resources()).or_raise(|| ErrorKind::Archive)?;

        let contents: Vec<&Resource> = subject.contents().collect();
        let total = contents.len();
        let mut units = Vec::with_capacity(total);
        for (index, resource) in contents.into_iter().enumerate() {
            units.push(self.render_unit(&mut package, subject.name(), scratch, index, total, resource)?);
        }

        let assembly = self
            .assembler
            .assemble(subject.name(), total, &units, &mut package, scratch.path())
            .or_raise(|| ErrorKind::Assembly)?;
        drop(package);
        let published = publish(&assembly, &self.settings.output_dir, stem).or_raise(|| ErrorKind::Assembly)?;
        Ok(RunReport {
            subject: subject.name().to_string(),
            sections: assembly.sections,
            pages: assembly.pages,
            pdf: published.pdf,
            epub: published.epub,
        })
    }

    #[instrument(skip_all, fields(index = index, resource = %resource.id))]
    fn render_unit(
        &self,
        package: &mut Package,
        subject: &str,
        scratch: &Scratch,
        index: usize,
        total: usize,
        resource: &Resource,
    ) -> Result<RenderedUnit> {
        let failed = |title: &str| ErrorKind::Render {
            index,
            total,
            id: resource.id.clone(),
            title: title.to_string(),
        };
        let entry = package.read(&resource.path).or_raise(|| ErrorKind::Archive)?;
        if entry.bytes.starts_with(PDF_MAGIC) {
            let title = section_title(&resource.title, None, index);
            let pdf = scratch.unit_pdf(index);
            std::fs::write(&pdf, &entry.bytes).or_raise(|| failed(&title))?;
            tracing::info!(title = %title, bytes = entry.bytes.len(), "Content is already a PDF; merged as is");
            let fragment = pdf_only(&title);
            return Ok(RenderedUnit { index, id: resource.id.clone(), title, pdf, fragment });
        }
        let page = Page::parse(&entry.name, &entry.bytes)
            .or_raise(|| failed(&section_title(&resource.title, None, index)))?;
        let title = section_title(&resource.title, page.title().as_deref(), index);
        let assets = gather_assets(package, &page).or_raise(|| ErrorKind::Archive)?;
        drop(page);
        tracing::debug!(assets = assets.len(), title = %title, "Rendering page");

        let source = PageSource {
            index,
            subject: subject.to_string(),
            id: resource.id.clone(),
            path: entry.name,
            title,
            markup: entry.bytes,
            assets,
        };
        let pdf = scratch.unit_pdf(index);
        self.renderer.render(&source, &pdf).or_raise(|| failed(&source.title))?;
        let fragment = self.converter.convert(&source).or_raise(|| failed(&source.title))?;
        Ok(RenderedUnit { index, id: source.id, title: source.title, pdf, fragment })
    }
}

/// EPUB chapter standing in for a section that exists only as a PDF.
fn pdf_only(title: &str) -> Fragment {
    let body = format!(
        "<h1 class=\"lectern-title\">{}</h1>\n<p class=\"lectern-pdf-only\">This section is only available in the PDF \
         edition.</p>",
        escape_xml(title)
    );
    Fragment { body, ..Fragment::default() }
}

/// Reads every package member `page` embeds, following stylesheet imports
/// and `url(...)` references. Members missing from the package are skipped:
/// the page is rendered without them, as a browser would.
fn gather_assets(package: &mut Package, page: &Page) -> lectern_package::archive::error::Result<Assets> {
    let mut assets = Assets::new();
    let mut pending: Vec<String> = page.references().into_iter().collect();
    while let Some(path) = pending.pop() {
        if assets.contains_key(&path) || path == page.path() || !package.contains(&path) {
            continue;
        }
        let entry = package.read(&path)?;
        if is_stylesheet(&path) {
            pending.extend(css::references(&path, &String::from_utf8_lossy(&entry.bytes)));
        }
        assets.insert(path, entry.bytes);
    }
    Ok(assets)
}

fn is_stylesheet(path: &str) -> bool {
    path.rsplit_once('.').is_some_and(|(_, extension)| extension.eq_ignore_ascii_case("css"))
}
