//! Service layer for the screenshot cache.
//!
//! This module contains the page-level helpers used by acquisition:
//! - Image URL extraction (`ImageExtractor`)

mod extractor;

pub use extractor::ImageExtractor;
