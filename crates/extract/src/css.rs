//! Scanning and rewriting references inside CSS text.

use crate::consts::CSS_REFERENCE_REGEX;
use lectern_package::path::resolve;
use regex::Captures;
use std::borrow::Cow;
use std::collections::BTreeSet;

/// Every raw `url(...)` or `@import "..."` target in a stylesheet, in order.
pub fn raw_references(css: &str) -> impl Iterator<Item = &str> {
    CSS_REFERENCE_REGEX
        .captures_iter(css)
        .filter_map(|caps| (1..=5).find_map(|group| caps.get(group)).map(|m| m.as_str().trim()))
        .filter(|value| !value.is_empty())
}

/// Archive members a stylesheet located at `css_path` refers to.
///
/// ```
/// use lectern_extract::css::references;
/// let css = r#"@import "base.css"; body { background: url('../img/bg.png') } a { background: url(https://x.org/a.png) }"#;
/// let found: Vec<_> = references("theme/site.css", css).into_iter().collect();
/// assert_eq!(found, ["img/bg.png", "theme/base.css"]);
/// ```
pub fn references(css_path: &str, css: &str) -> BTreeSet<String> {
    raw_references(css).filter_map(|raw| resolve(css_path, raw)).collect()
}

/// Replaces reference targets. `replace` receives the raw target and returns
/// the new one, or `None` to leave that reference untouched.
pub(crate) fn rewrite<'a>(css: &'a str, mut replace: impl FnMut(&str) -> Option<String>) -> Cow<'a, str> {
    CSS_REFERENCE_REGEX.replace_all(css, |caps: &Captures| {
        let is_import = caps.get(4).is_some() || caps.get(5).is_some();
        let value = (1..=5).find_map(|group| caps.get(group)).map(|m| m.as_str().trim()).unwrap_or_default();
        match (value.is_empty(), replace(value)) {
            (false, Some(new)) if is_import => format!("@import url(\"{new}\")"),
            (false, Some(new)) => format!("url(\"{new}\")"),
            _ => caps[0].to_string(),
        }
    })
}
