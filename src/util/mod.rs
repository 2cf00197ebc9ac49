//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **Text normalization**: HTML entity unescaping and lossy ASCII folding
//!   applied to every feed text field before it is stored
//! - **URL validation**: scheme checks for feed sources and launcher targets
//!
//! # Examples
//!
//! ```
//! use feedstage::util::{sanitize_text, validate_url};
//!
//! assert_eq!(sanitize_text("Caf&eacute;"), "Caf ");
//! assert!(validate_url("https://example.com/feed.xml").is_ok());
//! ```

mod text;
mod url_validator;

pub use text::{fold_ascii, sanitize_text, unescape_html};
pub use url_validator::{validate_url, UrlValidationError};
