//! Utility functions shared by the fetchers and the CLI.
//!
//! - **URL validation**: SSRF guards for article URLs, HTTPS enforcement for the API base
//! - **Text processing**: whitespace collapsing, control-character stripping, width-aware truncation

mod text;
mod url_validator;

pub use text::{collapse_whitespace, display_width, strip_control_chars, truncate_to_width};
pub use url_validator::{validate_api_base, validate_url, UrlValidationError};

/// Maximum accepted search query length, in characters
pub const MAX_SEARCH_QUERY_LENGTH: usize = 500;
