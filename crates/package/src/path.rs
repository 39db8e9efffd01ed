//! Archive member name normalization and reference resolution.
//!
//! Zip member names are untrusted input: they may use backslashes, carry
//! leading slashes or `./`, or try to climb out of the archive root. Every
//! name is run through [`normalize`] before it is used as a lookup key, and
//! every reference found in a page goes through [`resolve`] first.

use crate::archive::error::{ErrorKind, Result};
use percent_encoding::percent_decode_str;
use std::sync::LazyLock;
use url::Url;

const ARCHIVE_SCHEME: &str = "archive";

/// Base for resolving relative references as if the archive root were a web
/// root. `archive:` is not a special scheme, so the host stays empty.
static ARCHIVE_ROOT: LazyLock<Option<Url>> = LazyLock::new(|| Url::parse("archive:///").ok());

/// Normalizes an archive member name to its canonical `a/b/c.ext` form.
///
/// > **Note:** Unlike filesystem paths, member names always use `/`. A
/// >           backslash is treated as a separator, since some packaging
/// >           tools on Windows write them.
///
/// # Examples
///
/// ```
/// use lectern_package::path::normalize;
/// assert_eq!(normalize("./res/img/../css/site.css").unwrap(), "res/css/site.css");
/// assert_eq!(normalize("\\res\\page.html").unwrap(), "res/page.html");
/// assert!(normalize("../outside.html").is_err());
/// assert!(normalize("a\0b").is_err());
/// ```
pub fn normalize(name: &str) -> Result<String> {
    let invalid = || exn::Exn::from(ErrorKind::InvalidPath(name.to_string()));
    let mut components: Vec<&str> = Vec::new();
    for component in name.split(['/', '\\']) {
        match component {
            "" | "." => {},
            ".." => {
                if components.pop().is_none() {
                    return Err(invalid());
                }
            },
            _ if component.contains('\0') => return Err(invalid()),
            // A drive letter is never a valid member name component.
            _ if components.is_empty() && component.len() == 2 && component.ends_with(':') => return Err(invalid()),
            _ => components.push(component),
        }
    }
    match components.is_empty() {
        true => Err(invalid()),
        false => Ok(components.join("/")),
    }
}

/// Resolves a reference found in the page at `page_path` to an archive member
/// name.
///
/// Returns `None` when the reference does not point inside the archive:
/// absolute URLs of any scheme (`https:`, `data:`, `mailto:`, `javascript:`),
/// protocol-relative URLs, fragment-only links and empty values. Query strings
/// and fragments are dropped, and percent-escapes are decoded, so the result
/// can be looked up directly in the archive.
///
/// ```
/// use lectern_package::path::resolve;
/// assert_eq!(resolve("units/u1/page.html", "../img/a%20b.png#x").as_deref(), Some("units/img/a b.png"));
/// assert_eq!(resolve("units/u1/page.html", "/shared/site.css").as_deref(), Some("shared/site.css"));
/// assert_eq!(resolve("page.html", "https://cdn.example.org/x.js"), None);
/// assert_eq!(resolve("page.html", "#top"), None);
/// ```
pub fn resolve(page_path: &str, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return None;
    }
    let page = normalize(page_path).ok()?;
    let base = ARCHIVE_ROOT.as_ref()?.join(&page).ok()?;
    let resolved = base.join(&reference.replace('\\', "/")).ok()?;
    if resolved.scheme() != ARCHIVE_SCHEME || resolved.host_str().is_some_and(|h| !h.is_empty()) {
        return None;
    }
    let decoded = percent_decode_str(resolved.path()).decode_utf8_lossy();
    normalize(&decoded).ok()
}
