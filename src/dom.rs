//! HTML parsing capability.
//!
//! The extraction pipeline only talks to these traits, so another parser can
//! be dropped in. The `scraper` crate implementation lives at the bottom.

use log::warn;
use scraper::{ElementRef, Html, Selector};

pub trait DomNode: Sized {
    /// Descendants matching `selector`, in document order.
    fn query(&self, selector: &str) -> Vec<Self>;
    /// Visible text with whitespace collapsed.
    fn text(&self) -> String;
    fn attribute(&self, name: &str) -> Option<String>;

    fn query_first(&self, selector: &str) -> Option<Self> {
        self.query(selector).into_iter().next()
    }
}

pub trait Document {
    type Node<'a>: DomNode
    where
        Self: 'a;

    fn query<'a>(&'a self, selector: &str) -> Vec<Self::Node<'a>>;

    /// Every non-blank text node of the page, trimmed, in document order.
    fn text_lines(&self) -> Vec<String>;

    fn query_first<'a>(&'a self, selector: &str) -> Option<Self::Node<'a>> {
        self.query(selector).into_iter().next()
    }

    /// Lowercased full text, for page classification.
    fn lowercase_text(&self) -> String {
        self.text_lines().join("\n").to_lowercase()
    }
}

pub trait HtmlParser {
    type Doc: Document;

    fn parse(&self, markup: &str) -> Self::Doc;
}

/// `scraper`-backed parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScraperParser;

impl HtmlParser for ScraperParser {
    type Doc = Html;

    fn parse(&self, markup: &str) -> Html {
        Html::parse_document(markup)
    }
}

fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Invalid selector '{}': {:?}", selector, e);
            None
        }
    }
}

fn collapse_whitespace<'a, I: Iterator<Item = &'a str>>(parts: I) -> String {
    parts
        .flat_map(|p| p.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Document for Html {
    type Node<'a> = ElementRef<'a>;

    fn query<'a>(&'a self, selector: &str) -> Vec<ElementRef<'a>> {
        match parse_selector(selector) {
            Some(sel) => self.select(&sel).collect(),
            None => Vec::new(),
        }
    }

    fn text_lines(&self) -> Vec<String> {
        self.root_element()
            .descendants()
            .filter_map(|node| {
                let text = node.value().as_text()?;
                // Script and style bodies are text nodes too; leave them out.
                let hidden = node
                    .ancestors()
                    .filter_map(ElementRef::wrap)
                    .any(|a| matches!(a.value().name(), "script" | "style" | "noscript"));
                if hidden {
                    return None;
                }
                let line = text.trim();
                (!line.is_empty()).then(|| line.to_string())
            })
            .collect()
    }
}

impl<'a> DomNode for ElementRef<'a> {
    fn query(&self, selector: &str) -> Vec<Self> {
        match parse_selector(selector) {
            Some(sel) => self.select(&sel).collect(),
            None => Vec::new(),
        }
    }

    fn text(&self) -> String {
        collapse_whitespace(ElementRef::text(self))
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.value().attr(name).map(|v| v.trim().to_string())
    }
}
