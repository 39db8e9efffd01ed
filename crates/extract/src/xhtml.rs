//! Well-formed XHTML chapter bodies for EPUB packaging.
//!
//! The HTML5 parser has already recovered from whatever the page contained;
//! this module walks the resulting tree and writes it back out as XML,
//! dropping everything an e-reader should not execute or fetch.

use crate::consts::{
    self, DROPPED_ELEMENTS, MATHML_NAMESPACE, SVG_NAMESPACE, VOID_ELEMENTS, is_asset_attribute, is_stylesheet_link,
};
use crate::page::Page;
use crate::{Assets, css};
use lectern_package::path::resolve;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use scraper::{ElementRef, Node};
use std::collections::BTreeSet;

const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Directory, relative to the EPUB content root, holding package files.
pub const PACKAGE_DIR: &str = "package";

/// Replaces references that must not survive into an EPUB.
const BLANK_URL: &str = "data:,";

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// An EPUB-ready rendition of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    /// Serialized children of `<body>`, well-formed XHTML.
    pub body: String,
    /// Archive paths of linked stylesheets, in document order.
    pub stylesheets: Vec<String>,
    /// Contents of `<style>` blocks, in document order, references rewritten.
    pub styles: Vec<String>,
    /// Every archive member the chapter needs embedded, stylesheets and what
    /// they import included.
    pub assets: BTreeSet<String>,
}

/// Percent-encodes an archive path for use in an `href`, keeping `/`.
///
/// ```
/// use lectern_extract::encode_path;
/// assert_eq!(encode_path("img/célula 1.png"), "img/c%C3%A9lula%201.png");
/// ```
pub fn encode_path(path: &str) -> String {
    path.split('/').map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string()).collect::<Vec<_>>().join("/")
}

/// Href of an embedded archive member, as seen from a document `depth`
/// directories below the EPUB content root.
///
/// ```
/// use lectern_extract::package_href;
/// assert_eq!(package_href(1, "img/a.png"), "../package/img/a.png");
/// ```
pub fn package_href(depth: usize, path: &str) -> String {
    format!("{}{PACKAGE_DIR}/{}", "../".repeat(depth), encode_path(path))
}

/// Rewrites a stylesheet that will be stored at `package/<css_path>`.
///
/// Local references to `embedded` members are made relative to the
/// stylesheet (so root-relative references keep working); everything else
/// that would need a fetch is blanked.
pub fn epub_stylesheet(css_path: &str, css: &str, embedded: &BTreeSet<String>) -> String {
    // package/<css_path> sits one level deeper than its own directory count.
    let depth = css_path.matches('/').count() + 1;
    css::rewrite(css, |raw| match resolve(css_path, raw) {
        Some(path) if embedded.contains(&path) => Some(package_href(depth, &path)),
        _ if raw.starts_with("data:") => None,
        _ => Some(BLANK_URL.to_string()),
    })
    .into_owned()
}

impl Page {
    /// Converts the page's body to XHTML for a chapter stored one directory
    /// below the EPUB content root.
    ///
    /// `assets` are the archive members available for embedding; references
    /// to anything else are dropped.
    pub fn fragment(&self, assets: &Assets) -> Fragment {
        let mut writer = Writer { page: self, assets, out: String::new(), referenced: BTreeSet::new() };
        let mut fragment = Fragment::default();
        for element in self.document.select(&consts::STYLESHEET_SELECTOR) {
            if is_stylesheet_link(element.value().attr("rel"))
                && let Some(href) = element.value().attr("href")
                && let Some(path) = resolve(self.path(), href)
                && assets.contains_key(&path)
                && !fragment.stylesheets.contains(&path)
            {
                fragment.stylesheets.push(path);
            }
        }
        for element in self.document.select(&consts::STYLE_SELECTOR) {
            let css = writer.css(&element.text().collect::<String>());
            if !css.trim().is_empty() {
                fragment.styles.push(css);
            }
        }
        if let Some(body) = self.document.select(&consts::BODY_SELECTOR).next() {
            writer.children(body, XHTML_NAMESPACE);
        }
        let mut pending: Vec<String> = writer.referenced.iter().chain(&fragment.stylesheets).cloned().collect();
        let mut needed = BTreeSet::new();
        while let Some(path) = pending.pop() {
            if !needed.insert(path.clone()) {
                continue;
            }
            if path.ends_with(".css")
                && let Some(bytes) = assets.get(&path)
            {
                let imported = css::references(&path, &String::from_utf8_lossy(bytes));
                pending.extend(imported.into_iter().filter(|p| assets.contains_key(p)));
            }
        }
        fragment.body = writer.out;
        fragment.assets = needed;
        fragment
    }
}

struct Writer<'a> {
    page: &'a Page,
    assets: &'a Assets,
    out: String,
    referenced: BTreeSet<String>,
}
impl Writer<'_> {
    /// Embedded location of a raw reference, or `None` if it has to go.
    fn embed(&mut self, raw: &str) -> Option<String> {
        let path = resolve(self.page.path(), raw)?;
        if !self.assets.contains_key(&path) {
            return None;
        }
        let href = package_href(1, &path);
        self.referenced.insert(path);
        Some(href)
    }

    fn css(&mut self, css: &str) -> String {
        let mut embedded = Vec::new();
        let page_path = self.page.path();
        let rewritten = css::rewrite(css, |raw| match resolve(page_path, raw) {
            Some(path) if self.assets.contains_key(&path) => {
                let href = package_href(1, &path);
                embedded.push(path);
                Some(href)
            },
            _ if raw.starts_with("data:") => None,
            _ => Some(BLANK_URL.to_string()),
        })
        .into_owned();
        self.referenced.extend(embedded);
        rewritten
    }

    fn children(&mut self, element: ElementRef<'_>, namespace: &str) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => push_escaped(&mut self.out, text, false),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.element(child, namespace);
                    }
                },
                _ => {},
            }
        }
    }

    fn element(&mut self, element: ElementRef<'_>, parent_namespace: &str) {
        let value = element.value();
        let name = value.name();
        let namespace: &str = &value.name.ns;
        let is_html = namespace == XHTML_NAMESPACE;
        if is_html && (DROPPED_ELEMENTS.contains(&name) || name == "style" || name == "link") {
            return;
        }
        if !is_xml_name(name) {
            self.children(element, parent_namespace);
            return;
        }
        self.out.push('<');
        self.out.push_str(name);
        if namespace != parent_namespace && (namespace == SVG_NAMESPACE || namespace == MATHML_NAMESPACE || is_html) {
            self.out.push_str(" xmlns=\"");
            self.out.push_str(namespace);
            self.out.push('"');
        }
        // Attribute order from the parser is not guaranteed; output must be
        // byte-identical between runs.
        let mut attributes: Vec<_> = value.attrs().collect();
        attributes.sort_unstable_by_key(|(attribute, _)| *attribute);
        for (attribute, raw) in attributes {
            if let Some(rewritten) = self.attribute(name, attribute, raw) {
                self.out.push(' ');
                self.out.push_str(attribute);
                self.out.push_str("=\"");
                push_escaped(&mut self.out, &rewritten, true);
                self.out.push('"');
            }
        }
        let is_void = is_html && VOID_ELEMENTS.contains(&name);
        if is_void || (!is_html && !element.has_children()) {
            self.out.push_str("/>");
            return;
        }
        self.out.push('>');
        self.children(element, namespace);
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    /// The value an attribute keeps in the chapter, or `None` to drop it.
    fn attribute(&mut self, element: &str, attribute: &str, raw: &str) -> Option<String> {
        if !is_xml_name(attribute) || attribute.starts_with("on") || attribute == "xmlns" || attribute == "srcset" {
            return None;
        }
        if attribute == "style" {
            return Some(self.css(raw));
        }
        if is_asset_attribute(element, attribute) {
            if raw.trim_start().starts_with("data:") {
                return Some(raw.to_string());
            }
            return self.embed(raw);
        }
        if element == "a" && attribute == "href" {
            let trimmed = raw.trim();
            if trimmed.to_ascii_lowercase().starts_with("javascript:") {
                return None;
            }
            // Links to pages of the same package cannot be followed inside
            // the EPUB; links elsewhere stay as they are.
            return match resolve(self.page.path(), trimmed) {
                None => Some(raw.to_string()),
                Some(_) => self.embed(trimmed),
            };
        }
        Some(raw.to_string())
    }
}

/// Escapes text for use in XML content or a double-quoted attribute, dropping
/// characters XML cannot represent at all.
///
/// ```
/// use lectern_extract::escape_xml;
/// assert_eq!(escape_xml("\"Física\" & <Química>\u{1}"), "&quot;Física&quot; &amp; &lt;Química&gt;");
/// ```
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    push_escaped(&mut out, text, true);
    out
}

fn push_escaped(out: &mut String, text: &str, attribute: bool) {
    for c in text.chars().filter(|&c| is_xml_char(c)) {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

/// Whether XML 1.0 can represent `c` at all.
pub fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..)
}

/// ASCII subset of XML `Name`, without `:` since no prefixes are declared.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn assets() -> Assets {
        [
            ("unit/img/a b.png", &b"PNG"[..]),
            ("css/site.css", b"@import 'base.css'; body { background: url(/img/bg.gif) }"),
            ("css/base.css", b"p { background: url(../fonts/x.woff) }"),
            ("fonts/x.woff", b"WOFF"),
            ("img/bg.gif", b"GIF"),
            ("unit/docs/guide.pdf", b"%PDF"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_vec()))
        .collect()
    }

    fn fragment(html: &str) -> Fragment {
        Page::parse("unit/page.html", html.as_bytes()).unwrap().fragment(&assets())
    }

    #[test]
    fn output_is_well_formed() {
        let out = fragment("<p>One<br>Two &amp; <b>three</b><p>Four<img src='img/a b.png' alt=\"a\"></p><hr>");
        assert_eq!(
            out.body,
            r#"<p>One<br/>Two &amp; <b>three</b></p><p>Four<img alt="a" src="../package/unit/img/a%20b.png"/></p><hr/>"#
        );
        assert_eq!(out.assets.into_iter().collect::<Vec<_>>(), ["unit/img/a b.png"]);
    }

    #[rstest]
    #[case("<p>x</p><script>alert(1)</script>", "<p>x</p>")]
    #[case("<p>x</p><noscript>Enable JS</noscript>", "<p>x</p>")]
    #[case("<p>x</p><iframe src='img/a b.png'></iframe>", "<p>x</p>")]
    #[case("<p>x</p><object data='a.swf'><embed src='a.swf'></object>", "<p>x</p>")]
    #[case("<p onclick='go()' class='c'>x</p>", r#"<p class="c">x</p>"#)]
    #[case("<p>x</p><!-- note -->", "<p>x</p>")]
    fn drops_active_content(#[case] html: &str, #[case] expected: &str) {
        assert_eq!(fragment(html).body, expected);
    }

    #[rstest]
    #[case("<img src='https://cdn.example.org/x.png' alt='x'>", r#"<img alt="x"/>"#)]
    #[case("<img src='img/missing.png'>", "<img/>")]
    #[case("<img src='data:image/gif;base64,R0lG'>", r#"<img src="data:image/gif;base64,R0lG"/>"#)]
    #[case("<a href='https://example.org/'>x</a>", r#"<a href="https://example.org/">x</a>"#)]
    #[case("<a href='#s2'>x</a>", r##"<a href="#s2">x</a>"##)]
    #[case("<a href='other.html'>x</a>", "<a>x</a>")]
    #[case("<a href='docs/guide.pdf'>x</a>", r#"<a href="../package/unit/docs/guide.pdf">x</a>"#)]
    #[case("<a href='javascript:go()'>x</a>", "<a>x</a>")]
    fn rewrites_references(#[case] html: &str, #[case] expected: &str) {
        assert_eq!(fragment(html).body, expected);
    }

    #[test]
    fn escapes_text_and_attributes() {
        let out = fragment(r#"<p title='"quoted" &amp; <b>'>1 &lt; 2 &gt; 0</p>"#);
        assert_eq!(out.body, r#"<p title="&quot;quoted&quot; &amp; &lt;b&gt;">1 &lt; 2 &gt; 0</p>"#);
    }

    #[test]
    fn svg_gets_its_namespace() {
        let out = fragment("<svg viewBox='0 0 1 1'><circle r='1'></circle></svg>");
        assert_eq!(out.body, format!(r#"<svg xmlns="{SVG_NAMESPACE}" viewBox="0 0 1 1"><circle r="1"/></svg>"#));
    }

    #[test]
    fn collects_styles_and_transitive_assets() {
        let out = fragment(
            r#"<html><head><link rel="stylesheet" href="../css/site.css"><style>h1 { background: url("img/a b.png") } h2 { background: url(http://x.org/y.png) }</style></head>
            <body><p style="background: url('img/a b.png')">x</p></body></html>"#,
        );
        assert_eq!(out.stylesheets, ["css/site.css"]);
        assert_eq!(
            out.styles,
            [r#"h1 { background: url("../package/unit/img/a%20b.png") } h2 { background: url("data:,") }"#]
        );
        assert_eq!(out.body, r#"<p style="background: url(&quot;../package/unit/img/a%20b.png&quot;)">x</p>"#);
        let assets: Vec<_> = out.assets.into_iter().collect();
        assert_eq!(assets, ["css/base.css", "css/site.css", "fonts/x.woff", "img/bg.gif", "unit/img/a b.png"]);
    }

    #[test]
    fn epub_stylesheets_are_made_relative() {
        let css = "@import 'base.css'; body { background: url(/img/bg.gif) } p { background: url(https://x.org/a.png) }";
        let out = epub_stylesheet("css/site.css", css, &assets().into_keys().collect());
        assert_eq!(
            out,
            r#"@import url("../../package/css/base.css"); body { background: url("../../package/img/bg.gif") } p { background: url("data:,") }"#
        );
    }
}
