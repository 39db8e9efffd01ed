//! Reading finished deliverables back.
//!
//! Used to verify what was built before it is published, and by tests to
//! look at what a run produced.

use crate::epub::{CONTENT_DIR, MIMETYPE, chapter_href};
use crate::error::{ErrorKind, Result};
use crate::pdf::decode_text_string;
use exn::ResultExt;
use lopdf::{Document, Object};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::{CompressionMethod, ZipArchive};

/// What a merged PDF exposes to a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdf {
    pub pages: usize,
    /// Top-level bookmark titles, in order.
    pub outline: Vec<String>,
}
impl Pdf {
    pub fn open(path: &Path) -> Result<Self> {
        let doc = Document::load(path).or_raise(|| ErrorKind::Pdf(path.to_path_buf()))?;
        let outline = outline_titles(&doc).or_raise(|| ErrorKind::Pdf(path.to_path_buf()))?;
        Ok(Self { pages: doc.get_pages().len(), outline })
    }

    /// Bookmarks must match `titles` exactly, and every section needs at
    /// least one page.
    pub fn verify(&self, titles: &[&str]) -> Result<()> {
        if self.outline != titles {
            exn::bail!(ErrorKind::Verification(format!("PDF outline {:?} does not match {titles:?}", self.outline)));
        }
        if self.pages < titles.len() {
            exn::bail!(ErrorKind::Verification(format!("{} pages for {} sections", self.pages, titles.len())));
        }
        Ok(())
    }
}

fn outline_titles(doc: &Document) -> lopdf::Result<Vec<String>> {
    let root = doc.trailer.get(b"Root").and_then(Object::as_reference)?;
    let catalog = doc.get_dictionary(root)?;
    let Ok(outlines) = catalog.get(b"Outlines").and_then(Object::as_reference) else {
        return Ok(Vec::new());
    };
    let mut titles = Vec::new();
    let mut next = doc.get_dictionary(outlines)?.get(b"First").and_then(Object::as_reference).ok();
    // A malformed chain could loop; it cannot be longer than the object count.
    while let Some(id) = next
        && titles.len() < doc.objects.len()
    {
        let item = doc.get_dictionary(id)?;
        titles.push(decode_text_string(item.get(b"Title").and_then(Object::as_str)?));
        next = item.get(b"Next").and_then(Object::as_reference).ok();
    }
    Ok(titles)
}

/// What an EPUB exposes to a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Epub {
    /// `mimetype` is the first entry and is stored uncompressed.
    pub mimetype_first: bool,
    /// Chapter hrefs in spine order, relative to the content directory.
    pub spine: Vec<String>,
    /// Chapter hrefs in navigation document order.
    pub nav: Vec<String>,
    /// Table of contents titles.
    pub titles: Vec<String>,
}
impl Epub {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        let mut archive = ZipArchive::new(file).or_raise(|| ErrorKind::Epub)?;
        let mimetype_first = {
            let mut first = archive.by_index(0).or_raise(|| ErrorKind::Epub)?;
            let mut content = String::new();
            first.read_to_string(&mut content).or_raise(|| ErrorKind::Epub)?;
            first.name() == "mimetype" && first.compression() == CompressionMethod::Stored && content == MIMETYPE
        };
        let opf = Html::parse_document(&read_entry(&mut archive, &format!("{CONTENT_DIR}/content.opf"))?);
        let navigation = Html::parse_document(&read_entry(&mut archive, &format!("{CONTENT_DIR}/nav.xhtml"))?);

        let items: BTreeMap<&str, &str> = opf
            .select(&selector("manifest item")?)
            .filter_map(|item| Some((item.value().attr("id")?, item.value().attr("href")?)))
            .collect();
        let spine = opf
            .select(&selector("spine itemref")?)
            .filter_map(|itemref| items.get(itemref.value().attr("idref")?))
            .map(|href| href.to_string())
            .collect();
        let (nav, titles) = navigation
            .select(&selector("nav li a")?)
            .map(|a| (a.value().attr("href").unwrap_or_default().to_string(), a.text().collect::<String>()))
            .unzip();
        Ok(Self { mimetype_first, spine, nav, titles })
    }

    /// Navigation titles must match `titles` exactly, and both the spine and
    /// the navigation document must list one chapter per title, in order.
    pub fn verify(&self, titles: &[&str]) -> Result<()> {
        let fail = |message: String| exn::Exn::from(ErrorKind::Verification(message));
        if !self.mimetype_first {
            return Err(fail("EPUB does not start with a stored mimetype entry".to_string()));
        }
        if self.titles != titles {
            return Err(fail(format!("EPUB navigation {:?} does not match {titles:?}", self.titles)));
        }
        let chapters: Vec<String> = (0..titles.len()).map(chapter_href).collect();
        if self.spine != chapters {
            return Err(fail(format!("EPUB spine {:?} does not match {chapters:?}", self.spine)));
        }
        if self.nav != chapters {
            return Err(fail(format!("EPUB navigation targets {:?} do not match {chapters:?}", self.nav)));
        }
        Ok(())
    }
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<String> {
    let mut entry = archive.by_name(name).or_raise(|| ErrorKind::Epub)?;
    let mut content = String::new();
    entry.read_to_string(&mut content).or_raise(|| ErrorKind::Epub)?;
    Ok(content)
}

fn selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|_| exn::Exn::from(ErrorKind::Epub))
}
