//! HTML to plain-text conversion and link extraction

use scraper::{ElementRef, Html, Selector};
use siteforge_common::models::WebDocument;
use std::sync::LazyLock;
use url::Url;

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("h1 selector"));
static TEXT_BLOCKS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, h6, p, li, td, th, pre, blockquote")
        .expect("text block selector")
});
static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("link selector"));

const TEXT_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "td", "th", "pre", "blockquote",
];
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "nav", "footer", "aside"];

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

/// Blocks nested in another text block were already emitted with their parent
fn should_skip(el: ElementRef<'_>) -> bool {
    el.ancestors().filter_map(ElementRef::wrap).any(|a| {
        let name = a.value().name();
        SKIPPED_TAGS.contains(&name) || TEXT_TAGS.contains(&name)
    })
}

/// Convert a page into a titled plain-text document.
///
/// Headings, paragraphs, list items and table cells become blank-line
/// separated blocks; navigation and scripts are dropped.
pub fn html_to_document(url: &str, html: &str) -> WebDocument {
    let doc = Html::parse_document(html);

    let title = doc
        .select(&TITLE)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .or_else(|| doc.select(&H1).next().map(element_text))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.to_string());

    let blocks: Vec<String> = doc
        .select(&TEXT_BLOCKS)
        .filter(|el| !should_skip(*el))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();

    WebDocument {
        url: url.to_string(),
        title,
        text: blocks.join("\n\n"),
    }
}

/// Absolute http(s) links on the page, fragments stripped, in page order
pub fn extract_links(base: &Url, html: &str) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let mut links = Vec::new();

    for el in doc.select(&LINKS) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        if let Ok(mut resolved) = base.join(href) {
            resolved.set_fragment(None);
            if matches!(resolved.scheme(), "http" | "https") {
                links.push(resolved);
            }
        }
    }

    links
}
