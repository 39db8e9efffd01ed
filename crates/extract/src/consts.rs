use regex::Regex;
use scraper::Selector;
use std::sync::LazyLock;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        pub(crate) static $name: LazyLock<Selector> = LazyLock::new(|| Selector::parse($css).unwrap());
    };
}

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

selector!(TITLE_SELECTOR, "head title");
selector!(BODY_SELECTOR, "body");
selector!(STYLE_SELECTOR, "style");
selector!(STYLESHEET_SELECTOR, "link[href]");

// `url(...)` in any of its three spellings, or the string form of `@import`.
regex!(
    CSS_REFERENCE_REGEX,
    r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)|@import\s+(?:"([^"]*)"|'([^']*)')"#
);
regex!(WHITESPACE_REGEX, r"\s+");

/// Elements and attributes through which a page embeds another file.
///
/// Anchors are deliberately absent: a link is navigation, not an embedded
/// asset. `link` is handled separately, since only stylesheets count.
pub(crate) const ASSET_ATTRIBUTES: &[(&str, &str)] = &[
    ("img", "src"),
    ("img", "srcset"),
    ("script", "src"),
    ("source", "src"),
    ("source", "srcset"),
    ("video", "src"),
    ("video", "poster"),
    ("audio", "src"),
    ("embed", "src"),
    ("object", "data"),
    ("iframe", "src"),
    ("input", "src"),
    ("track", "src"),
    ("image", "href"),
    ("body", "background"),
    ("table", "background"),
    ("td", "background"),
    ("th", "background"),
];

/// Elements that never make it into an EPUB chapter.
pub(crate) const DROPPED_ELEMENTS: &[&str] =
    &["script", "noscript", "iframe", "frame", "frameset", "object", "embed", "applet", "base", "meta", "title"];

/// Elements serialized as `<name/>` in XHTML.
pub(crate) const VOID_ELEMENTS: &[&str] = &[
    "area", "br", "col", "hr", "img", "input", "param", "source", "track", "wbr",
];

pub(crate) const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
pub(crate) const MATHML_NAMESPACE: &str = "http://www.w3.org/1998/Math/MathML";

pub(crate) fn is_asset_attribute(element: &str, attribute: &str) -> bool {
    ASSET_ATTRIBUTES.iter().any(|(e, a)| *e == element && *a == attribute)
}

pub(crate) fn is_stylesheet_link(rel: Option<&str>) -> bool {
    rel.is_some_and(|rel| rel.split_ascii_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")))
}
