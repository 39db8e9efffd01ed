//! EPUB 3 packaging, with an EPUB 2 NCX for older readers.
//!
//! Package documents are [upon] templates embedded from `assets/epub/`. Every
//! value is escaped through the `xml` formatter unless it is already markup,
//! in which case the template says `raw`.
//!
//! Output is byte-identical for identical input: entries are written in a
//! fixed order, with a fixed timestamp, and the identifier is derived from
//! the subject rather than generated.

use crate::error::{ErrorKind, Result};
use crate::{EpubOptions, RenderedUnit, Section};
use exn::{OptionExt, ResultExt};
use lectern_extract::{PACKAGE_DIR, epub_stylesheet, package_href};
use lectern_package::Package;
use rust_embed::Embed;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::instrument;
use upon::{Engine, Template};
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, DateTime};

pub(crate) const MIMETYPE: &str = "application/epub+zip";
pub(crate) const CONTENT_DIR: &str = "OEBPS";

#[derive(Embed)]
#[folder = "../../assets/epub/"]
struct Templates;
impl Templates {
    fn load(name: &str) -> Result<Vec<u8>> {
        Self::get(name).map(|f| f.data.into_owned()).ok_or_raise(|| ErrorKind::Epub)
    }
}

/// Compiled package document templates.
struct Documents {
    engine: Engine<'static>,
    content: Template<'static>,
    nav: Template<'static>,
    ncx: Template<'static>,
    chapter: Template<'static>,
}
impl Documents {
    fn new() -> Result<Self> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let compile = |name: &str| -> Result<Template<'static>> {
            let source = String::from_utf8(Templates::load(name)?).or_raise(|| ErrorKind::Epub)?;
            engine.compile(source).or_raise(|| ErrorKind::Epub)
        };
        let (content, nav, ncx, chapter) =
            (compile("content.opf")?, compile("nav.xhtml")?, compile("toc.ncx")?, compile("chapter.xhtml")?);
        Ok(Self { engine, content, nav, ncx, chapter })
    }

    fn render(&self, template: &Template<'static>, context: impl Serialize) -> Result<Vec<u8>> {
        let rendered = template.render(&self.engine, context).to_string().or_raise(|| ErrorKind::Epub)?;
        Ok(rendered.into_bytes())
    }
}

#[derive(Debug, Serialize)]
struct Book<'a> {
    identifier: &'a str,
    title: &'a str,
    language: &'a str,
    modified: &'a str,
    chapters: &'a [ChapterEntry<'a>],
    assets: &'a [AssetEntry],
}

#[derive(Debug, Serialize)]
struct ChapterEntry<'a> {
    item: String,
    /// Relative to the content directory.
    href: String,
    title: &'a str,
    /// Play order in the NCX, from one.
    order: usize,
    /// Either empty or a complete ` properties="..."` attribute.
    properties: String,
}

#[derive(Debug, Serialize)]
struct AssetEntry {
    item: String,
    href: String,
    media_type: String,
}

#[derive(Debug, Serialize)]
struct Chapter<'a> {
    language: &'a str,
    title: &'a str,
    stylesheets: Vec<String>,
    styles: &'a [String],
    body: &'a str,
}

/// Archive path of the `n`th chapter (from zero), relative to the content
/// directory.
pub(crate) fn chapter_href(index: usize) -> String {
    format!("text/c{:03}.xhtml", index + 1)
}

/// `urn:lectern:` followed by a BLAKE3 digest of the subject and its
/// resource ids, so rebuilding the same subject keeps the same identity.
pub(crate) fn identifier(subject: &str, sections: &[Section<'_>]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(subject.as_bytes());
    for section in sections {
        hasher.update(b"\0");
        hasher.update(section.id.as_bytes());
    }
    format!("urn:lectern:{}", hasher.finalize().to_hex())
}

/// Manifest `properties` a chapter needs for the markup it contains.
fn chapter_properties(body: &str) -> String {
    let properties: Vec<&str> = [("<svg", "svg"), ("<math", "mathml")]
        .into_iter()
        .filter_map(|(needle, property)| body.contains(needle).then_some(property))
        .collect();
    match properties.is_empty() {
        true => String::new(),
        false => format!(" properties=\"{}\"", properties.join(" ")),
    }
}

fn stored() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

fn deflated() -> SimpleFileOptions {
    stored().compression_method(CompressionMethod::Deflated)
}

struct EpubWriter<'p> {
    zip: ZipWriter<BufWriter<File>>,
    path: &'p Path,
}
impl EpubWriter<'_> {
    fn add(&mut self, name: &str, options: SimpleFileOptions, bytes: &[u8]) -> Result<()> {
        self.zip.start_file(name, options).or_raise(|| ErrorKind::Epub)?;
        self.zip.write_all(bytes).or_raise(|| ErrorKind::Io(self.path.to_path_buf()))?;
        Ok(())
    }

    fn finish(self) -> Result<()> {
        let mut out = self.zip.finish().or_raise(|| ErrorKind::Epub)?;
        out.flush().or_raise(|| ErrorKind::Io(self.path.to_path_buf()))
    }
}

#[instrument(skip_all, fields(path = %save_to.display()))]
pub(crate) fn write(
    subject: &str,
    units: &[RenderedUnit],
    sections: &[Section<'_>],
    package: &mut Package,
    options: &EpubOptions,
    save_to: &Path,
) -> Result<()> {
    let documents = Documents::new()?;
    let identifier = identifier(subject, sections);

    let chapters: Vec<ChapterEntry<'_>> = units
        .iter()
        .zip(sections)
        .enumerate()
        .map(|(position, (unit, section))| ChapterEntry {
            item: format!("c{:03}", position + 1),
            href: chapter_href(position),
            title: &section.title,
            order: position + 1,
            properties: chapter_properties(&unit.fragment.body),
        })
        .collect();
    let embedded: BTreeSet<String> = units.iter().flat_map(|unit| unit.fragment.assets.iter().cloned()).collect();
    let assets: Vec<AssetEntry> = embedded
        .iter()
        .enumerate()
        .map(|(position, path)| AssetEntry {
            item: format!("a{:04}", position + 1),
            href: package_href(0, path),
            media_type: mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string(),
        })
        .collect();
    let book = Book {
        identifier: &identifier,
        title: subject,
        language: &options.language,
        modified: &options.modified,
        chapters: &chapters,
        assets: &assets,
    };

    let file = File::create(save_to).or_raise(|| ErrorKind::Io(save_to.to_path_buf()))?;
    let mut epub = EpubWriter { zip: ZipWriter::new(BufWriter::new(file)), path: save_to };
    // Readers identify the format by this entry alone: first, uncompressed.
    epub.add("mimetype", stored(), MIMETYPE.as_bytes())?;
    epub.add("META-INF/container.xml", deflated(), &Templates::load("container.xml")?)?;
    epub.add(&format!("{CONTENT_DIR}/content.opf"), deflated(), &documents.render(&documents.content, &book)?)?;
    epub.add(&format!("{CONTENT_DIR}/nav.xhtml"), deflated(), &documents.render(&documents.nav, &book)?)?;
    epub.add(&format!("{CONTENT_DIR}/toc.ncx"), deflated(), &documents.render(&documents.ncx, &book)?)?;
    epub.add(&format!("{CONTENT_DIR}/book.css"), deflated(), &Templates::load("book.css")?)?;

    for ((unit, section), entry) in units.iter().zip(sections).zip(&chapters) {
        let chapter = Chapter {
            language: &options.language,
            title: &section.title,
            stylesheets: unit.fragment.stylesheets.iter().map(|path| package_href(1, path)).collect(),
            styles: &unit.fragment.styles,
            body: &unit.fragment.body,
        };
        let xhtml = documents.render(&documents.chapter, &chapter)?;
        epub.add(&format!("{CONTENT_DIR}/{}", entry.href), deflated(), &xhtml)?;
    }

    for path in &embedded {
        let entry = package.read(path).or_raise(|| ErrorKind::Epub)?;
        let bytes = match mime_guess::from_path(path).first().is_some_and(|mime| mime.essence_str() == "text/css") {
            true => epub_stylesheet(path, &String::from_utf8_lossy(&entry.bytes), &embedded).into_bytes(),
            false => entry.bytes,
        };
        // Entry names are plain paths; only hrefs are percent-encoded.
        epub.add(&format!("{CONTENT_DIR}/{PACKAGE_DIR}/{path}"), deflated(), &bytes)?;
    }
    epub.finish()?;
    tracing::debug!(chapters = chapters.len(), assets = assets.len(), "EPUB packaged");
    Ok(())
}

/// Custom [`upon`] formatters for XML output.
mod addons {
    use lectern_extract::escape_xml;
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Escapes strings for XML text and double-quoted attributes.
    fn xml_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => write!(f, "{}", escape_xml(s))?,
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    /// Writes strings that are already well-formed markup as they are.
    fn raw_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => write!(f, "{s}")?,
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("xml", xml_formatter);
        engine.add_formatter("raw", raw_formatter);
    }
}
