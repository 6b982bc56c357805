//! Page markup extraction
//!
//! A fetched page is a whole HTML document; the router only wants what
//! goes into the live `<body>` and the new `<title>`.

use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::OnceLock;

static BODY_PATTERN: OnceLock<Regex> = OnceLock::new();
static TITLE_PATTERN: OnceLock<Regex> = OnceLock::new();

/// The parts of a fetched page the reconciler consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMarkup {
    /// Inner markup of `<body>`
    pub body: String,
    /// Decoded `<title>` text, `None` when the page has no title
    pub title: Option<String>,
}

/// Pull body markup and title out of a full page
///
/// The body match is greedy up to the last `</body>`, so stray closing tags
/// inside inline scripts do not cut the page short. Returns `None` when the
/// text has no recognizable body.
pub fn extract_page(text: &str) -> Option<PageMarkup> {
    let body_pattern = BODY_PATTERN
        .get_or_init(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body\s*>").expect("valid body regex"));
    let title_pattern = TITLE_PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").expect("valid title regex")
    });

    let body = body_pattern.captures(text)?.get(1)?.as_str().to_string();
    let title = title_pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|raw| decode_text(raw.as_str()));

    Some(PageMarkup { body, title })
}

/// Resolve character references the way the title element would
///
/// `<title>` holds escapable raw text: references are decoded, anything
/// tag-like stays literal.
fn decode_text(raw: &str) -> String {
    let parsed = Html::parse_document(&format!("<title>{raw}</title>"));
    parsed
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|element| element.value().name() == "title")
        .map(|title| title.text().collect::<String>())
        .unwrap_or_default()
        .trim()
        .to_string()
}
