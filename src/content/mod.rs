//! Article body extraction.
//!
//! [`ContentFetcher`] downloads the article page (SSRF-checked, size-limited,
//! retried on transient errors) and [`extract_main_text`] picks the readable
//! paragraphs out of the HTML with CSS selector heuristics.

mod extractor;
mod fetcher;

pub use extractor::{extract_main_text, MIN_BODY_CHARS, MIN_CANDIDATE_CHARS};
pub use fetcher::{redirect_policy, ContentError, ContentFetcher};
