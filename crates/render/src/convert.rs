use crate::error::{ErrorKind, Result};
use crate::{FragmentConverter, PageSource};
use exn::ResultExt;
use lectern_extract::{Fragment, Page, escape_xml};
use tracing::instrument;

/// Turns a page into an EPUB chapter body headed by its section title.
#[derive(Debug, Default, Clone, Copy)]
pub struct XhtmlConverter;

impl FragmentConverter for XhtmlConverter {
    #[instrument(skip_all, fields(index = source.index, page = %source.path))]
    fn convert(&self, source: &PageSource) -> Result<Fragment> {
        let page = Page::parse(&source.path, &source.markup).or_raise(|| ErrorKind::Markup(source.path.clone()))?;
        let mut fragment = page.fragment(&source.assets);
        fragment.body = format!("<h1 class=\"lectern-title\">{}</h1>\n{}", escape_xml(&source.title), fragment.body);
        tracing::debug!(assets = fragment.assets.len(), bytes = fragment.body.len(), "Page converted");
        Ok(fragment)
    }
}
