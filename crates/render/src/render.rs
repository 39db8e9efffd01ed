use crate::chrome::{Chrome, ChromeOptions};
use crate::error::{ErrorKind, Result};
use crate::process::Processes;
use crate::style::{CssVariables, StyleConfig};
use crate::{PageRenderer, PageSource, TempFile};
use exn::ResultExt;
use lectern_extract::inline_document;
use std::io::{Read, Write};
use std::path::Path;
use tracing::instrument;

/// Prints pages to PDF with a headless Chrome/Chromium.
pub struct ChromeRenderer {
    chrome: Chrome,
    styles: StyleConfig,
    options: ChromeOptions,
    processes: Processes,
}
impl ChromeRenderer {
    pub fn new(options: ChromeOptions, styles: StyleConfig) -> Result<Self> {
        let chrome = match &options.executable {
            Some(path) => Chrome::from_path(path)?,
            None => Chrome::discover()?,
        };
        tracing::debug!(?chrome, styles = styles.len(), "Chrome renderer ready");
        Ok(Self { chrome, styles, options, processes: Processes::new() })
    }

    /// Registers every Chrome process in `processes` while it runs, so an
    /// interrupt handler holding a clone can stop it.
    pub fn with_processes(mut self, processes: Processes) -> Self {
        self.processes = processes;
        self
    }

    /// Writes `html` to a temporary file in `dir`, with the configured styles
    /// injected just before `</head>` (or at the very end, for documents
    /// without one).
    fn persist_html<R: Read>(&self, mut html: R, variables: Option<CssVariables>, dir: &Path) -> Result<TempFile> {
        let mut tmp = tempfile::Builder::new()
            .prefix("page-")
            .suffix(".html")
            .tempfile_in(dir)
            .or_raise(|| ErrorKind::Io)?;
        const NEEDLE: &[u8] = b"</head";
        const CARRY_SIZE: usize = NEEDLE.len() - 1;
        const BUFFER_CAPACITY: usize = 8192;
        const BUFFER_WINDOW: usize = BUFFER_CAPACITY - CARRY_SIZE;
        // The last CARRY_SIZE bytes of each window are held back and re-scanned
        // with the next one, so a needle split across two reads is still found.
        let mut buffer = vec![0; BUFFER_WINDOW + CARRY_SIZE];
        let mut carry: usize = 0;
        'chunk: loop {
            let bytes = html.read(&mut buffer[carry..carry + BUFFER_WINDOW]).or_raise(|| ErrorKind::Io)?;
            if bytes == 0 {
                tmp.write_all(&buffer[..carry]).or_raise(|| ErrorKind::Io)?;
                break 'chunk;
            }
            let filled = carry + bytes;
            if let Some(pos) = buffer[..filled].windows(NEEDLE.len()).position(|w| w.eq_ignore_ascii_case(NEEDLE)) {
                tmp.write_all(&buffer[..pos]).or_raise(|| ErrorKind::Io)?;
                let blocks = self.inject_css(&mut tmp, variables)?;
                tmp.write_all(&buffer[pos..filled]).or_raise(|| ErrorKind::Io)?;
                tracing::debug!(position = pos, blocks = blocks, "Print stylesheets injected into page");
                std::io::copy(&mut html, &mut tmp).or_raise(|| ErrorKind::Io)?;
                return Ok(tmp);
            }
            let safe = filled.saturating_sub(CARRY_SIZE);
            tmp.write_all(&buffer[..safe]).or_raise(|| ErrorKind::Io)?;
            buffer.copy_within(safe..filled, 0);
            carry = filled - safe;
        }
        // Browsers apply trailing <style> blocks too.
        let blocks = self.inject_css(&mut tmp, variables)?;
        tracing::debug!(blocks = blocks, "Closing head tag not found; print stylesheets appended");
        Ok(tmp)
    }

    fn inject_css(&self, w: &mut impl Write, variables: Option<CssVariables>) -> Result<usize> {
        if let Some(vars) = &variables {
            write!(w, "{}", vars).or_raise(|| ErrorKind::Io)?;
        }
        let blocks = self.styles.write_all_to(w).or_raise(|| ErrorKind::Io)?;
        let blocks = if variables.is_some() { blocks.saturating_add(1) } else { blocks };
        Ok(blocks)
    }
}

impl PageRenderer for ChromeRenderer {
    #[instrument(skip_all, fields(index = source.index, page = %source.path))]
    fn render(&self, source: &PageSource, save_to: &Path) -> Result<()> {
        let workdir = save_to.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let html = inline_document(&source.path, &source.markup, &source.assets)
            .or_raise(|| ErrorKind::Markup(source.path.clone()))?;
        let input = self.persist_html(html.as_bytes(), Some(source.css_variables()), workdir)?;
        self.chrome.execute(input.path(), save_to, workdir, &self.options, &self.processes)?;
        tracing::debug!(output = %save_to.display(), "Page printed");
        Ok(())
    }
}
