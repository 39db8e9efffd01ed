//! Self-contained HTML for print rendering.
//!
//! The renderer loads pages from a scratch directory that holds nothing but
//! the page itself, so every local reference must travel inside the document:
//! assets become `data:` URIs, linked stylesheets become `<style>` blocks.

use crate::Assets;
use crate::consts::{ASSET_ATTRIBUTES, is_stylesheet_link};
use crate::css;
use crate::error::{ErrorKind, Result};
use crate::page::decode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use exn::ResultExt;
use lectern_package::path::resolve;
use lol_html::html_content::ContentType;
use lol_html::{RewriteStrSettings, element, rewrite_str, text};
use tracing::instrument;

/// `@import` chains deeper than this are left as they are.
const MAX_IMPORT_DEPTH: usize = 4;

struct Inliner<'a> {
    page_path: &'a str,
    assets: &'a Assets,
}
impl Inliner<'_> {
    /// `data:` URI for a raw reference found in a file located at `base`.
    fn reference(&self, base: &str, raw: &str, depth: usize) -> Option<String> {
        let path = resolve(base, raw)?;
        let bytes = self.assets.get(&path)?;
        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        if mime.essence_str() == "text/css" {
            if depth >= MAX_IMPORT_DEPTH {
                return None;
            }
            let stylesheet = self.stylesheet(&path, &String::from_utf8_lossy(bytes), depth + 1);
            return Some(format!("data:text/css;base64,{}", STANDARD.encode(stylesheet)));
        }
        Some(format!("data:{};base64,{}", mime.essence_str(), STANDARD.encode(bytes)))
    }

    fn stylesheet(&self, base: &str, css: &str, depth: usize) -> String {
        css::rewrite(css, |raw| self.reference(base, raw, depth)).into_owned()
    }

    fn srcset(&self, srcset: &str) -> String {
        srcset
            .split(',')
            .filter_map(|candidate| {
                let mut parts = candidate.split_whitespace();
                let url = parts.next()?;
                let url = self.reference(self.page_path, url, 0).unwrap_or_else(|| url.to_string());
                Some(parts.fold(url, |acc, descriptor| format!("{acc} {descriptor}")))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Rewrites a page into a document that needs nothing but itself.
///
/// References that do not resolve to one of `assets` (remote URLs, or local
/// files missing from the package) are left untouched. Charset declarations
/// are dropped and a UTF-8 byte order mark is prepended, since the output is
/// always UTF-8 regardless of the source encoding.
#[instrument(skip_all, fields(page = page_path, assets = assets.len()))]
pub fn inline_document(page_path: &str, markup: &[u8], assets: &Assets) -> Result<String> {
    let html = decode(page_path, markup)?;
    let inliner = Inliner { page_path, assets };
    let inliner = &inliner;
    let mut style_text = String::new();
    let rewritten = rewrite_str(
        &html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("meta[charset]", |el| {
                    el.remove();
                    Ok(())
                }),
                element!("base", |el| {
                    el.remove();
                    Ok(())
                }),
                element!("meta[http-equiv]", |el| {
                    if el.get_attribute("http-equiv").is_some_and(|v| v.eq_ignore_ascii_case("content-type")) {
                        el.remove();
                    }
                    Ok(())
                }),
                element!("link[href]", move |el| {
                    if !is_stylesheet_link(el.get_attribute("rel").as_deref()) {
                        return Ok(());
                    }
                    let href = el.get_attribute("href").unwrap_or_default();
                    if let Some(path) = resolve(inliner.page_path, &href)
                        && let Some(bytes) = inliner.assets.get(&path)
                    {
                        let css = inliner.stylesheet(&path, &String::from_utf8_lossy(bytes), 1);
                        let media = el.get_attribute("media").map(|m| format!(" media=\"{}\"", m.replace('"', "&quot;")));
                        let block = format!("<style{}>{}</style>", media.unwrap_or_default(), css.replace("</style", "<\\/style"));
                        el.replace(&block, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("*", move |el| {
                    let name = el.tag_name().to_ascii_lowercase();
                    for (element, attribute) in ASSET_ATTRIBUTES {
                        if *element != name {
                            continue;
                        }
                        let Some(value) = el.get_attribute(attribute) else { continue };
                        let replacement = match *attribute {
                            "srcset" => Some(inliner.srcset(&value)),
                            _ => inliner.reference(inliner.page_path, &value, 0),
                        };
                        if let Some(replacement) = replacement {
                            el.set_attribute(attribute, &replacement)?;
                        }
                    }
                    if let Some(style) = el.get_attribute("style") {
                        let rewritten = inliner.stylesheet(inliner.page_path, &style, 0);
                        el.set_attribute("style", &rewritten)?;
                    }
                    Ok(())
                }),
                // Text inside `<style>` may arrive in several chunks; rewrite it
                // once the whole node has been seen.
                text!("style", move |t| {
                    style_text.push_str(t.as_str());
                    if t.last_in_text_node() {
                        let css = inliner.stylesheet(inliner.page_path, &std::mem::take(&mut style_text), 0);
                        t.replace(&css, ContentType::Html);
                    } else {
                        t.remove();
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .or_raise(|| ErrorKind::Rewrite(page_path.to_string()))?;
    Ok(format!("\u{feff}{rewritten}"))
}
