//! End-to-end runs against packages on disk, with a stand-in for Chrome.

use lectern_assemble::EpubOptions;
use lectern_assemble::inspect::{Epub, Pdf};
use lectern_manifest::Manifest;
use lectern_package::{FetchOptions, Fetcher};
use lectern_pipeline::error::ErrorKind;
use lectern_pipeline::{DEFAULT_TEMPLATE, Pipeline, RunReport, Settings};
use lectern_render::{PageRenderer, PageSource, XhtmlConverter};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use std::cell::RefCell;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Prints every page as plain text, one PDF page per paragraph, and can be
/// told to fail at a given position.
#[derive(Default)]
struct StubRenderer {
    fail_at: Option<usize>,
    calls: RefCell<Vec<(usize, PathBuf)>>,
}
impl PageRenderer for StubRenderer {
    fn render(&self, source: &PageSource, save_to: &Path) -> lectern_render::error::Result<()> {
        self.calls.borrow_mut().push((source.index, save_to.to_path_buf()));
        if self.fail_at == Some(source.index) {
            exn::bail!(lectern_render::error::ErrorKind::ChromeFailed(1));
        }
        let paragraphs = String::from_utf8_lossy(&source.markup).matches("<p>").count().max(1);
        write_pdf(save_to, &source.title, paragraphs);
        Ok(())
    }
}

fn write_pdf(path: &Path, title: &str, pages: usize) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for n in 0..pages {
        let text = format!("BT /F1 12 Tf 72 720 Td ({title} {n}) Tj ET");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), text.into_bytes()));
        let page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()]
        };
        kids.push(Object::Reference(doc.add_object(page)));
    }
    let tree = dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => pages as i64 };
    doc.objects.insert(pages_id, Object::Dictionary(tree));
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

const INTRO: &str = r#"<html><head><title>Intro</title><link rel="stylesheet" href="../css/unit.css"></head>
<body><p>Bienvenida</p><img src="../img/cell.png" alt="cell"></body></html>"#;
const CELULAS: &str = "<html><body><p>Membrana</p><p>Núcleo</p></body></html>";
const GENETICA: &str = "<html><body><p>ADN</p></body></html>";

/// A workspace with the Biologia package on disk, its manifest, and empty
/// output and scratch directories.
struct Fixture {
    root: TempDir,
    manifest: Manifest,
}
impl Fixture {
    fn new(files: &[(&str, &[u8])]) -> Self {
        Self::with_third_page(files, "u3/genetica.html")
    }

    fn with_third_page(files: &[(&str, &[u8])], third: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(bytes).unwrap();
        }
        let package = root.path().join("biologia.zip");
        std::fs::write(&package, zip.finish().unwrap().into_inner()).unwrap();

        let locator = url::Url::from_file_path(&package).unwrap().to_string();
        let manifest = serde_json::json!({
            "Biologia": {
                "package": locator,
                "resources": [
                    { "id": "r1", "title": "Intro", "path": "u1/intro.html", "role": "content" },
                    { "id": "a1", "title": "", "path": "img/cell.png", "role": "asset" },
                    { "id": "r2", "title": "Celulas", "path": "u2/celulas.html", "role": "content" },
                    { "id": "r3", "title": "Genetica", "path": third, "role": "content" }
                ]
            }
        });
        Self { manifest: manifest.to_string().parse().unwrap(), root }
    }

    fn complete() -> Self {
        Self::new(&[
            ("u1/intro.html", INTRO.as_bytes()),
            ("css/unit.css", b"body { background: url(../img/bg.png) }"),
            ("img/bg.png", b"\x89PNG bg"),
            ("img/cell.png", b"\x89PNG cell"),
            ("u2/celulas.html", CELULAS.as_bytes()),
            ("u3/genetica.html", GENETICA.as_bytes()),
        ])
    }

    fn output(&self) -> PathBuf {
        self.root.path().join("deliverables")
    }

    fn scratch(&self) -> PathBuf {
        self.root.path().join("scratch")
    }

    fn run_into(&self, output: &Path, renderer: &StubRenderer) -> lectern_pipeline::error::Result<RunReport> {
        let settings = Settings {
            output_dir: output.to_path_buf(),
            scratch_root: self.scratch(),
            namer: DEFAULT_TEMPLATE.parse().unwrap(),
            max_entry_bytes: 1 << 20,
            epub: EpubOptions::default(),
        };
        let pipeline = Pipeline::new(settings, Fetcher::new(&FetchOptions::default()), renderer, XhtmlConverter);
        pipeline.run(self.manifest.subject("Biologia").unwrap())
    }

    fn run(&self, renderer: &StubRenderer) -> lectern_pipeline::error::Result<RunReport> {
        self.run_into(&self.output(), renderer)
    }
}

impl PageRenderer for &StubRenderer {
    fn render(&self, source: &PageSource, save_to: &Path) -> lectern_render::error::Result<()> {
        (**self).render(source, save_to)
    }
}

fn listing(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
    let mut names: Vec<_> = entries.map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
    names.sort();
    names
}

#[test]
fn converts_a_subject_in_manifest_order() {
    let fixture = Fixture::complete();
    let renderer = StubRenderer::default();
    let report = fixture.run(&renderer).unwrap();

    assert_eq!(listing(&fixture.output()), ["biologia.epub", "biologia.pdf"]);
    assert!(listing(&fixture.scratch()).is_empty(), "scratch is cleaned up");
    assert_eq!(report.subject, "Biologia");
    assert_eq!(report.sections, 3);
    assert_eq!(report.pages, 4);
    assert_eq!(report.pdf.path, fixture.output().join("biologia.pdf"));

    let pdf = Pdf::open(&report.pdf.path).unwrap();
    assert_eq!(pdf.outline, ["Intro", "Celulas", "Genetica"]);
    assert_eq!(pdf.pages, 4);
    let epub = Epub::open(&report.epub.path).unwrap();
    assert!(epub.mimetype_first);
    assert_eq!(epub.titles, ["Intro", "Celulas", "Genetica"]);
    assert_eq!(epub.spine, ["text/c001.xhtml", "text/c002.xhtml", "text/c003.xhtml"]);

    let calls = renderer.calls.borrow();
    assert_eq!(calls.iter().map(|(index, _)| *index).collect::<Vec<_>>(), [0, 1, 2]);
    assert!(calls.iter().all(|(_, path)| path.starts_with(fixture.scratch())));
}

#[test]
fn pages_are_rendered_with_their_assets() {
    struct Inspecting(RefCell<Vec<Vec<String>>>);
    impl PageRenderer for &Inspecting {
        fn render(&self, source: &PageSource, save_to: &Path) -> lectern_render::error::Result<()> {
            self.0.borrow_mut().push(source.assets.keys().cloned().collect());
            write_pdf(save_to, &source.title, 1);
            Ok(())
        }
    }

    let fixture = Fixture::complete();
    let inspecting = Inspecting(RefCell::default());
    let settings = Settings {
        output_dir: fixture.output(),
        scratch_root: fixture.scratch(),
        namer: "{{ subject|slug }}-{{ resources }}".parse().unwrap(),
        max_entry_bytes: 1 << 20,
        epub: EpubOptions::default(),
    };
    let pipeline = Pipeline::new(settings, Fetcher::new(&FetchOptions::default()), &inspecting, XhtmlConverter);
    let report = pipeline.run(fixture.manifest.subject("Biologia").unwrap()).unwrap();

    assert_eq!(report.epub.path, fixture.output().join("biologia-3.epub"));
    let assets = inspecting.0.borrow();
    assert_eq!(assets[0], ["css/unit.css", "img/bg.png", "img/cell.png"]);
    assert!(assets[1].is_empty());
}

#[test]
fn missing_page_is_an_archive_error() {
    let fixture = Fixture::new(&[
        ("u1/intro.html", INTRO.as_bytes()),
        ("img/cell.png", b"\x89PNG cell"),
        ("u2/celulas.html", CELULAS.as_bytes()),
    ]);
    let renderer = StubRenderer::default();
    let err = fixture.run(&renderer).unwrap_err();

    assert_eq!(*err, ErrorKind::Archive);
    assert!(!err.is_retryable());
    assert!(listing(&fixture.output()).is_empty());
    assert!(listing(&fixture.scratch()).is_empty());
    assert!(renderer.calls.borrow().is_empty(), "nothing is rendered before the package checks out");
}

#[test]
fn render_failure_names_the_resource_and_leaves_nothing_behind() {
    let fixture = Fixture::complete();
    let renderer = StubRenderer { fail_at: Some(1), ..StubRenderer::default() };
    let err = fixture.run(&renderer).unwrap_err();

    assert_eq!(*err, ErrorKind::Render { index: 1, total: 3, id: "r2".into(), title: "Celulas".into() });
    assert_eq!((*err).to_string(), "rendering failed at resource 2 of 3 (r2: Celulas)");
    assert_eq!(renderer.calls.borrow().len(), 2, "the run stops at the first failure");
    assert!(listing(&fixture.output()).is_empty());
    assert!(listing(&fixture.scratch()).is_empty());
}

#[test]
fn unreachable_package_is_a_fetch_error() {
    let fixture = Fixture::complete();
    std::fs::remove_file(fixture.root.path().join("biologia.zip")).unwrap();
    let err = fixture.run(&StubRenderer::default()).unwrap_err();
    assert_eq!(*err, ErrorKind::Fetch);
    assert!(listing(&fixture.scratch()).is_empty());
}

#[test]
fn rerun_after_failure_matches_a_clean_run() {
    let fixture = Fixture::complete();
    let failing = StubRenderer { fail_at: Some(2), ..StubRenderer::default() };
    fixture.run(&failing).unwrap_err();
    let retried = fixture.run(&StubRenderer::default()).unwrap();

    let clean_output = fixture.root.path().join("clean");
    let clean = fixture.run_into(&clean_output, &StubRenderer::default()).unwrap();

    assert_eq!(retried.pdf.blake3, clean.pdf.blake3);
    assert_eq!(retried.epub.blake3, clean.epub.blake3);
    assert_eq!(std::fs::read(&retried.pdf.path).unwrap(), std::fs::read(&clean.pdf.path).unwrap());
    assert_eq!(std::fs::read(&retried.epub.path).unwrap(), std::fs::read(&clean.epub.path).unwrap());
}

#[test]
fn pdf_content_is_merged_without_rendering() {
    let scans = tempfile::tempdir().unwrap();
    let scan = scans.path().join("genetica.pdf");
    write_pdf(&scan, "Escaneado", 3);
    let scan = std::fs::read(&scan).unwrap();
    let fixture = Fixture::with_third_page(
        &[
            ("u1/intro.html", INTRO.as_bytes()),
            ("img/cell.png", b"\x89PNG cell"),
            ("u2/celulas.html", CELULAS.as_bytes()),
            ("u3/genetica.pdf", scan.as_slice()),
        ],
        "u3/genetica.pdf",
    );
    let renderer = StubRenderer::default();
    let report = fixture.run(&renderer).unwrap();

    assert_eq!(renderer.calls.borrow().iter().map(|(index, _)| *index).collect::<Vec<_>>(), [0, 1]);
    assert_eq!(report.sections, 3);
    assert_eq!(report.pages, 1 + 2 + 3);
    let pdf = Pdf::open(&report.pdf.path).unwrap();
    assert_eq!(pdf.outline, ["Intro", "Celulas", "Genetica"]);
    let epub = Epub::open(&report.epub.path).unwrap();
    assert_eq!(epub.titles, ["Intro", "Celulas", "Genetica"]);
    assert!(listing(&fixture.scratch()).is_empty());
}

#[test]
fn summary_lists_both_deliverables() {
    let fixture = Fixture::complete();
    let report = fixture.run(&StubRenderer::default()).unwrap();
    let summary = report.to_string();
    assert!(summary.starts_with("Biologia: 3 sections, 4 pages\n"), "{summary}");
    assert!(summary.contains(&format!("blake3:{}", report.pdf.blake3)));
    assert!(summary.contains(&report.epub.path.display().to_string()));
}
