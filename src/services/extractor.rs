//! Image URL extraction from screenshot pages.
//!
//! Looks for the canonical `og:image` tag first and the viewer's
//! `img#screenshot-image` element second.

use scraper::{Html, Selector};

use crate::error::{AppError, Result};

const OG_IMAGE_SELECTOR: &str = r#"meta[property="og:image"]"#;
const SCREENSHOT_IMG_SELECTOR: &str = "img#screenshot-image";

/// Service for locating the image URL inside page markup.
pub struct ImageExtractor {
    og_image: Selector,
    screenshot_img: Selector,
}

impl ImageExtractor {
    /// Create an extractor with the built-in selectors.
    pub fn new() -> Result<Self> {
        Ok(Self {
            og_image: Self::parse_selector(OG_IMAGE_SELECTOR)?,
            screenshot_img: Self::parse_selector(SCREENSHOT_IMG_SELECTOR)?,
        })
    }

    /// Extract the raw (possibly relative) image URL, or `None`.
    pub fn extract(&self, markup: &str) -> Option<String> {
        let document = Html::parse_document(markup);

        let from_meta = document
            .select(&self.og_image)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|content| !content.is_empty());
        if let Some(url) = from_meta {
            return Some(url.to_string());
        }

        document
            .select(&self.screenshot_img)
            .filter_map(|el| el.value().attr("src"))
            .map(str::trim)
            .find(|src| !src.is_empty())
            .map(str::to_string)
    }

    fn parse_selector(selector: &str) -> Result<Selector> {
        Selector::parse(selector).map_err(|e| AppError::selector(selector, format!("{e:?}")))
    }
}
