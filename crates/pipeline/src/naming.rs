//! Output file naming.
//!
//! Deliverable names come from a user-configured [upon] template, rendered
//! once per run. The template sees these variables:
//!
//! | Variable    | Type     | Description                              |
//! |-------------|----------|------------------------------------------|
//! | `subject`   | `String` | Subject name, as written in the manifest |
//! | `resources` | `u64`    | Number of content resources              |
//!
//! Two helpers are registered on top of upon's own syntax:
//!
//! - **`slug`** formats strings as URL-safe slugs, stripping quotation marks
//!   first so they do not turn into stray hyphens.
//! - **`truncate`** shortens strings to a maximum byte length at a character
//!   boundary, as `truncate(value, n)` or `{{ value|truncate: n }}`.
//!
//! ```
//! use lectern_pipeline::OutputNamer;
//!
//! let namer: OutputNamer = "{{ subject|slug }}".parse().unwrap();
//! assert_eq!(namer.generate("Biología Celular", 3).unwrap(), "biologia-celular");
//! ```

use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use lectern_package::path::normalize;
use std::str::FromStr;
use tracing::instrument;
use upon::{Engine, Template};

pub const DEFAULT_TEMPLATE: &str = "{{ subject|slug }}";

/// Turns a subject into the stem shared by its PDF and EPUB.
///
/// The stem may contain `/` to place deliverables in subdirectories of the
/// output directory; it can never leave it.
pub struct OutputNamer {
    engine: Engine<'static>,
    template: Template<'static>,
}
impl FromStr for OutputNamer {
    type Err = Error;

    /// Compiles the template, so syntax errors surface before any work is done.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let template = engine.compile(s.to_string()).or_raise(|| ErrorKind::Template)?;
        Ok(Self { engine, template })
    }
}
impl OutputNamer {
    /// Renders the stem for `subject`, without extension.
    #[instrument(skip(self))]
    pub fn generate(&self, subject: &str, resources: usize) -> Result<String> {
        let stem = self
            .template
            .render(&self.engine, upon::value! { subject: subject, resources: resources as u64 })
            .to_string()
            .or_raise(|| ErrorKind::Template)?;
        let stem = stem.trim().split('/').map(str::trim).collect::<Vec<_>>().join("/");
        normalize(&stem).or_raise(|| ErrorKind::Template)
    }
}

/// Custom [`upon`] extensions for file-name-safe string manipulation.
mod addons {
    use rslug::slugify;
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Converts strings to URL-safe slugs, dropping quotation marks first so
    /// `"Célula"` does not become `-celula-`.
    fn slug_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                // Various quotation marks: '"‘’“”„‛`«»‹›
                let marks = [
                    '\u{0027}', '\u{0022}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{201E}', '\u{201B}',
                    '\u{0060}', '\u{00AB}', '\u{00BB}', '\u{2039}', '\u{203A}',
                ];
                let stripped: String = s.chars().filter(|c| !marks.contains(c)).collect();
                write!(f, "{}", slugify!(&stripped))?
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
        s[..s.floor_char_boundary(max_bytes)].to_string()
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("slug", slug_formatter);
        engine.add_function("truncate", truncate_to_char_boundary);
    }
}
