//! Utility functions shared by configuration loading and message formatting.
//!
//! - **URL validation**: checks that feed sources point at usable http(s) endpoints
//! - **Text processing**: control character stripping, HTML-to-text and truncation
//!   for feed-supplied strings before they are embedded in a message

mod text;
mod url_validator;

pub use text::{html_to_text, strip_control_chars, truncate_chars};
pub use url_validator::{validate_feed_url, UrlValidationError};
