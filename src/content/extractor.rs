use scraper::{Html, Selector};
use std::sync::OnceLock;

use crate::util::collapse_whitespace;

/// Paragraph selectors tried in order; specific article containers first,
/// generic page regions last.
const CANDIDATE_SELECTORS: &[&str] = &[
    "article p",
    "[itemprop=articleBody] p",
    ".article-body p",
    ".article-content p",
    ".entry-content p",
    ".post-content p",
    ".story-body p",
    "main p",
    "#content p",
];

/// A candidate must exceed this many characters to be accepted.
pub const MIN_CANDIDATE_CHARS: usize = 200;

/// Below this, even the all-paragraphs fallback counts as "no content found".
pub const MIN_BODY_CHARS: usize = 50;

static CANDIDATES: OnceLock<Vec<Selector>> = OnceLock::new();
static ALL_PARAGRAPHS: OnceLock<Option<Selector>> = OnceLock::new();

fn candidates() -> &'static [Selector] {
    CANDIDATES.get_or_init(|| {
        CANDIDATE_SELECTORS
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .collect()
    })
}

fn all_paragraphs() -> Option<&'static Selector> {
    ALL_PARAGRAPHS
        .get_or_init(|| Selector::parse("p").ok())
        .as_ref()
}

/// Extracts the readable body of an article page.
///
/// Each candidate selector's paragraphs are whitespace-collapsed and joined
/// with blank lines. The first candidate longer than
/// [`MIN_CANDIDATE_CHARS`] wins; otherwise every `<p>` on the page is used.
/// Returns `None` when the result is shorter than [`MIN_BODY_CHARS`].
///
/// ```
/// use newsdesk::content::extract_main_text;
///
/// assert_eq!(extract_main_text("<html><body><p>Too short</p></body></html>"), None);
/// ```
pub fn extract_main_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    for selector in candidates() {
        let text = paragraph_text(&document, selector);
        if text.chars().count() > MIN_CANDIDATE_CHARS {
            return Some(text);
        }
    }

    let fallback = paragraph_text(&document, all_paragraphs()?);
    if fallback.chars().count() < MIN_BODY_CHARS {
        tracing::debug!(chars = fallback.chars().count(), "No article body found");
        return None;
    }
    Some(fallback)
}

fn paragraph_text(document: &Html, selector: &Selector) -> String {
    document
        .select(selector)
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
