//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL validation**: Security-focused validation of caller-supplied endpoints
//! - **Text processing**: HTML-to-text conversion, sanitising and truncation
//!
//! # Examples
//!
//! ```
//! use inkfeed::util::{html_to_text, truncate_chars, validate_url};
//!
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//! let text = html_to_text("<p>Breaking <em>news</em></p>");
//! let short = truncate_chars(&text, 8);
//! ```

mod text;
mod url_validator;

pub use text::{collapse_whitespace, html_to_text, strip_control_chars, truncate_chars};
pub use url_validator::{is_absolute_http_url, validate_url, UrlValidationError};
