//! CSS custom properties (variables) for rendered pages.
//!
//! [`CssVariables`] is rendered as a `<style>` block setting `:root` custom
//! properties prefixed with `--meta-`, so that print stylesheets can put the
//! subject or section title in running headers without templating.

use rslug::slugify;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// A set of CSS custom properties injected as `:root` variables.
///
/// Each entry becomes `--meta-{key}: "{value}"` in a `<style>` block.
/// Values are escaped per the [W3C CSS string token grammar][spec].
///
/// [spec]: https://www.w3.org/TR/css-syntax-3/#consume-string-token
#[derive(Debug, Default)]
pub struct CssVariables {
    variables: BTreeMap<String, String>,
}
impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CssVariables {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let variables = iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { variables }
    }
}
impl Display for CssVariables {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(f, "<style>\n:root {{")?;
        for (key, value) in self.variables.iter() {
            writeln!(f, "    --meta-{}: \"{}\";", slugify!(key), css_escape_string(value))?;
        }
        write!(f, "}}\n</style>")
    }
}

/// https://www.w3.org/TR/css-syntax-3/#consume-string-token
fn css_escape_string(value: impl AsRef<str>) -> String {
    value
        .as_ref()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\a ")
        .replace('\r', "\\d ")
        .replace('\x0C', "\\c ")
        .replace('\0', "\\fffd ")
        // A literal `</style>` would end the block early.
        .replace('<', "\\3c ")
}
