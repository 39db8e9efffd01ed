//! Markup analysis for package pages.
//!
//! Everything here is pure: bytes and paths in, strings and sets out. Pages
//! are parsed with the HTML5 parser from [`scraper`], so any markup a browser
//! would display is accepted.

mod consts;
pub mod css;
pub mod error;
mod inline;
mod page;
mod xhtml;

use std::collections::BTreeMap;

pub use crate::inline::inline_document;
pub use crate::page::{Page, decode};
pub use crate::xhtml::{Fragment, PACKAGE_DIR, encode_path, epub_stylesheet, escape_xml, is_xml_char, package_href};

/// Archive members available to a page, by normalized archive path.
pub type Assets = BTreeMap<String, Vec<u8>>;
