use crate::consts::{self, is_asset_attribute, is_stylesheet_link};
use crate::css;
use crate::error::{ErrorKind, Result};
use lectern_package::path::resolve;
use scraper::{ElementRef, Html};
use std::borrow::Cow;
use std::collections::BTreeSet;
use tracing::instrument;

/// Only the head of a document is sniffed for binary content.
const SNIFF_BYTES: usize = 1024;

/// A parsed content page, together with its location inside the package.
///
/// Parsing never fails on malformed markup: the HTML5 parser recovers from
/// anything, the way a browser would.
#[derive(Debug)]
pub struct Page {
    path: String,
    pub(crate) document: Html,
}
impl Page {
    #[instrument(skip(markup), fields(bytes = markup.len()))]
    pub fn parse(path: &str, markup: &[u8]) -> Result<Self> {
        let html = decode(path, markup)?;
        Ok(Self { path: path.to_string(), document: Html::parse_document(&html) })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The document's `<title>`, whitespace collapsed. `None` if absent or blank.
    pub fn title(&self) -> Option<String> {
        self.document
            .select(&consts::TITLE_SELECTOR)
            .next()
            .map(|el| consts::WHITESPACE_REGEX.replace_all(&el.text().collect::<String>(), " ").trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Archive members this page embeds, resolved against the page's own
    /// directory. Stylesheets are listed but not followed; see
    /// [`css::references`] for what they pull in.
    pub fn references(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut add = |raw: &str| {
            if let Some(path) = resolve(&self.path, raw) {
                found.insert(path);
            }
        };
        for element in self.document.root_element().descendants().filter_map(ElementRef::wrap) {
            let value = element.value();
            let name = value.name();
            for (attribute, raw) in value.attrs() {
                match attribute {
                    "srcset" if is_asset_attribute(name, attribute) => srcset_urls(raw).for_each(&mut add),
                    "style" => css::raw_references(raw).for_each(&mut add),
                    _ if is_asset_attribute(name, attribute) => add(raw),
                    _ => {},
                }
            }
            if name == "link"
                && is_stylesheet_link(value.attr("rel"))
                && let Some(href) = value.attr("href")
            {
                add(href);
            }
            if name == "style" {
                css::raw_references(&element.text().collect::<String>()).for_each(&mut add);
            }
        }
        tracing::trace!(page = %self.path, references = found.len(), "References collected");
        found
    }
}

/// URL candidates of a `srcset` attribute, descriptors dropped.
pub(crate) fn srcset_urls(srcset: &str) -> impl Iterator<Item = &str> {
    srcset.split(',').filter_map(|candidate| candidate.split_whitespace().next())
}

/// Decodes page bytes to text.
///
/// UTF-8 (with or without BOM) and BOM-marked UTF-16 are decoded as such.
/// Anything else is read as Latin-1, which never fails and matches what most
/// legacy courseware without a declared charset was authored in. Bytes that
/// look binary are refused.
pub fn decode<'a>(path: &str, markup: &'a [u8]) -> Result<Cow<'a, str>> {
    if let Some(rest) = markup.strip_prefix(b"\xEF\xBB\xBF") {
        return decode_bytes(path, rest);
    }
    let utf16 = match markup {
        [0xFF, 0xFE, rest @ ..] => Some((rest, u16::from_le_bytes as fn([u8; 2]) -> u16)),
        [0xFE, 0xFF, rest @ ..] => Some((rest, u16::from_be_bytes as fn([u8; 2]) -> u16)),
        _ => None,
    };
    if let Some((rest, to_unit)) = utf16 {
        let units = rest.chunks_exact(2).map(|pair| to_unit([pair[0], pair[1]]));
        let text: String = char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)).collect();
        return Ok(Cow::Owned(text));
    }
    decode_bytes(path, markup)
}

fn decode_bytes<'a>(path: &str, markup: &'a [u8]) -> Result<Cow<'a, str>> {
    if markup[..markup.len().min(SNIFF_BYTES)].contains(&0) {
        exn::bail!(ErrorKind::NotMarkup(path.to_string()));
    }
    Ok(match std::str::from_utf8(markup) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            tracing::debug!(page = path, "Markup is not UTF-8; decoding as Latin-1");
            Cow::Owned(markup.iter().map(|&b| char::from(b)).collect())
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PAGE: &str = r##"<!DOCTYPE html>
<html><head>
  <title>
    Las   células
  </title>
  <link rel="stylesheet" href="../css/site.css">
  <link rel="icon" href="favicon.ico">
  <style>h1 { background: url("../img/banner.png") }</style>
  <script src="../js/api.js"></script>
</head><body background="bg.jpg">
  <img src="img/cell.png" srcset="img/cell-2x.png 2x, img/cell-3x.png 3x">
  <img src="https://cdn.example.org/remote.png">
  <img src="data:image/png;base64,AAAA">
  <video poster="media/poster.jpg"><source src="media/clip.mp4"><track src="media/clip.vtt"></video>
  <div style="background-image: url(img/tile.gif)"></div>
  <object data="media/anim.swf"></object>
  <a href="next.html">Next</a>
  <a href="#top">Top</a>
</body></html>"##;

    #[test]
    fn collects_embedded_references() {
        let page = Page::parse("unit1/celulas.html", PAGE.as_bytes()).unwrap();
        let found: Vec<_> = page.references().into_iter().collect();
        assert_eq!(
            found,
            [
                "css/site.css",
                "img/banner.png",
                "js/api.js",
                "unit1/bg.jpg",
                "unit1/img/cell-2x.png",
                "unit1/img/cell-3x.png",
                "unit1/img/cell.png",
                "unit1/img/tile.gif",
                "unit1/media/anim.swf",
                "unit1/media/clip.mp4",
                "unit1/media/clip.vtt",
                "unit1/media/poster.jpg",
            ]
        );
    }

    #[test]
    fn title_is_collapsed() {
        let page = Page::parse("p.html", PAGE.as_bytes()).unwrap();
        assert_eq!(page.title().as_deref(), Some("Las células"));
    }

    #[rstest]
    #[case("<html><head><title>  </title></head><body></body></html>")]
    #[case("<p>No head at all</p>")]
    #[case("")]
    fn missing_title(#[case] html: &str) {
        assert_eq!(Page::parse("p.html", html.as_bytes()).unwrap().title(), None);
    }

    #[test]
    fn latin1_is_decoded() {
        let page = Page::parse("p.html", b"<title>Gen\xe9tica</title>").unwrap();
        assert_eq!(page.title().as_deref(), Some("Genética"));
    }

    #[test]
    fn utf16_with_bom_is_decoded() {
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend("<title>Física</title>".encode_utf16().flat_map(u16::to_le_bytes));
        let page = Page::parse("p.html", &bytes).unwrap();
        assert_eq!(page.title().as_deref(), Some("Física"));
    }

    #[test]
    fn utf8_bom_is_stripped() {
        assert_eq!(decode("p.html", b"\xEF\xBB\xBF<p>").unwrap(), "<p>");
    }

    #[test]
    fn binary_is_not_markup() {
        let err = Page::parse("img/cell.png", b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").unwrap_err();
        assert_eq!(*err, ErrorKind::NotMarkup("img/cell.png".into()));
    }
}
