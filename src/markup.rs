//! Image reference extraction and rewriting for rich-text HTML.
//!
//! Documents are scanned with lol_html's streaming rewriter. Parsing records
//! every `<img src>` in document order; edits are kept against a
//! [`NodeHandle`] and applied in a second streaming pass on serialization, so
//! everything outside the rewritten attributes comes back byte-for-byte.

use crate::models::ReplaceTask;
use crate::{Error, Result};
use lol_html::{element, HtmlRewriter, Settings};
use std::collections::BTreeMap;
use url::Url;

/// Identifies one `<img>` element by its position among all `<img>` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeHandle(usize);

impl NodeHandle {
    pub fn new(position: usize) -> Self {
        Self(position)
    }

    pub fn position(self) -> usize {
        self.0
    }
}

/// An `<img>` element that carries a `src` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub handle: NodeHandle,
    pub src: String,
}

/// Markup that exposes its image references and can be rewritten.
pub trait MarkupDocument: Sized + Send {
    fn parse(markup: &str) -> Result<Self>;

    /// Image references in document order.
    fn image_refs(&self) -> &[ImageRef];

    fn set_image_ref(&mut self, handle: NodeHandle, value: &str) -> Result<()>;

    fn serialize(&self) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HtmlDocument {
    source: String,
    images: Vec<ImageRef>,
    edits: BTreeMap<NodeHandle, String>,
}

impl MarkupDocument for HtmlDocument {
    fn parse(markup: &str) -> Result<Self> {
        let mut images = Vec::new();
        let mut position = 0usize;

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![element!("img", |el| {
                    let handle = NodeHandle(position);
                    position += 1;
                    if let Some(raw) = el.get_attribute("src") {
                        // Attribute text is still entity-encoded (`&amp;` in query strings).
                        let src = html_escape::decode_html_entities(&raw).into_owned();
                        images.push(ImageRef { handle, src });
                    }
                    Ok(())
                })],
                ..Settings::default()
            },
            |_: &[u8]| {},
        );

        rewriter
            .write(markup.as_bytes())
            .map_err(|e| Error::Markup(format!("HTML parse error: {}", e)))?;
        rewriter
            .end()
            .map_err(|e| Error::Markup(format!("HTML parse finalization error: {}", e)))?;

        Ok(Self {
            source: markup.to_string(),
            images,
            edits: BTreeMap::new(),
        })
    }

    fn image_refs(&self) -> &[ImageRef] {
        &self.images
    }

    fn set_image_ref(&mut self, handle: NodeHandle, value: &str) -> Result<()> {
        if !self.images.iter().any(|image| image.handle == handle) {
            return Err(Error::Markup(format!(
                "no <img src> element at position {}",
                handle.0
            )));
        }
        self.edits.insert(handle, value.to_string());
        Ok(())
    }

    fn serialize(&self) -> Result<String> {
        if self.edits.is_empty() {
            return Ok(self.source.clone());
        }

        let mut output = Vec::with_capacity(self.source.len());
        let mut position = 0usize;
        let edits = &self.edits;

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![element!("img", |el| {
                    if let Some(value) = edits.get(&NodeHandle(position)) {
                        el.set_attribute("src", value)?;
                    }
                    position += 1;
                    Ok(())
                })],
                ..Settings::default()
            },
            |c: &[u8]| output.extend_from_slice(c),
        );

        rewriter
            .write(self.source.as_bytes())
            .map_err(|e| Error::Markup(format!("HTML rewrite error: {}", e)))?;
        rewriter
            .end()
            .map_err(|e| Error::Markup(format!("HTML rewrite finalization error: {}", e)))?;

        String::from_utf8(output)
            .map_err(|e| Error::Markup(format!("Invalid UTF-8 in rewritten HTML: {}", e)))
    }
}

impl HtmlDocument {
    pub fn edit_count(&self) -> usize {
        self.edits.len()
    }
}

/// Absolute `http`/`https` URL. Relative paths, `data:` URIs and
/// scheme-relative references do not qualify.
pub fn is_remote_url(src: &str) -> bool {
    match Url::parse(src.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}

/// Tasks for every remote image reference, in document order.
pub fn extract_tasks<D: MarkupDocument>(doc: &D) -> Vec<ReplaceTask> {
    doc.image_refs()
        .iter()
        .filter(|image| is_remote_url(&image.src))
        .enumerate()
        .map(|(index, image)| ReplaceTask {
            index,
            source: image.src.trim().to_string(),
            node: image.handle,
        })
        .collect()
}
