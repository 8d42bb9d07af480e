//! Ordered extraction strategies used by the HTML extractor

use scraper::{ElementRef, Html, Selector};

const BLOCK_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6, li, blockquote, pre";

/// One way of locating the main text of a page
pub trait ExtractionStrategy {
    /// Short name recorded in the document metadata
    fn name(&self) -> &'static str;

    /// Returns the text found, or None when this strategy does not apply
    fn extract(&self, document: &Html) -> Option<String>;
}

/// Uses a source's configured CSS selectors, first match wins
pub struct SelectorStrategy {
    selectors: Vec<String>,
}

impl SelectorStrategy {
    pub fn new(selectors: &[String]) -> Self {
        Self {
            selectors: selectors.to_vec(),
        }
    }
}

impl ExtractionStrategy for SelectorStrategy {
    fn name(&self) -> &'static str {
        "selector"
    }

    fn extract(&self, document: &Html) -> Option<String> {
        for raw in &self.selectors {
            let selector = match Selector::parse(raw) {
                Ok(selector) => selector,
                Err(e) => {
                    tracing::warn!("Skipping invalid content selector '{}': {:?}", raw, e);
                    continue;
                }
            };

            let text = join_blocks(document.select(&selector).map(root_text));
            if !text.is_empty() {
                return Some(text);
            }
        }
        None
    }
}

/// Reads the first `<article>`, then the first `<main>`
pub struct SemanticStrategy;

impl ExtractionStrategy for SemanticStrategy {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn extract(&self, document: &Html) -> Option<String> {
        ["article", "main"].iter().find_map(|tag| {
            let selector = Selector::parse(tag).ok()?;
            let root = document.select(&selector).next()?;
            Some(root_text(root)).filter(|text| !text.is_empty())
        })
    }
}

/// Every `<p>` on the page, outside navigation chrome
pub struct ParagraphStrategy;

impl ExtractionStrategy for ParagraphStrategy {
    fn name(&self) -> &'static str {
        "paragraphs"
    }

    fn extract(&self, document: &Html) -> Option<String> {
        let selector = Selector::parse("p").ok()?;
        let text = join_blocks(
            document
                .select(&selector)
                .filter(|p| !inside_chrome(*p))
                .map(|p| element_text(&p)),
        );
        Some(text).filter(|text| !text.is_empty())
    }
}

/// Text of a content root, one line per block element
///
/// Falls back to the root's own text when it contains no block elements.
fn root_text(root: ElementRef<'_>) -> String {
    let Ok(blocks) = Selector::parse(BLOCK_SELECTOR) else {
        return element_text(&root);
    };

    let text = join_blocks(
        root.select(&blocks)
            // Only innermost blocks, so nested lists are not read twice
            .filter(|block| block.select(&blocks).next().is_none())
            .map(|block| element_text(&block)),
    );

    if text.is_empty() {
        element_text(&root)
    } else {
        text
    }
}

fn inside_chrome(element: ElementRef<'_>) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map_or(false, |e| matches!(e.name(), "nav" | "header" | "footer" | "aside"))
    })
}

fn element_text(element: &ElementRef<'_>) -> String {
    let mut raw = String::new();
    for piece in element.text() {
        raw.push_str(piece);
        raw.push(' ');
    }
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn join_blocks(blocks: impl Iterator<Item = String>) -> String {
    blocks
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
