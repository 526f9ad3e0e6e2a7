// src/pipeline/acquire.rs

//! Acquisition pipeline: random id → page → image URL → validated image.
//!
//! Every outbound request waits on the availability breaker and the rate
//! limiter first. Most random ids do not exist, so failure is the common
//! outcome of a single attempt.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::{AcquireError, Result};
use crate::models::{BanConfig, Config, Item, UpstreamConfig};
use crate::pipeline::{AvailabilityBreaker, RateLimiter};
use crate::services::ImageExtractor;
use crate::utils::generate_id;
use crate::utils::http::{ByteStream, Upstream};
use crate::utils::url::{find_bad_marker, is_blocked_host, normalize_image_url};

/// Bytes inspected when sniffing for mislabeled HTML.
const SNIFF_LEN: usize = 1024;

type AcquireResult<T> = std::result::Result<T, AcquireError>;

/// Source of validated items, as seen by the worker pool and the resolver.
#[async_trait]
pub trait Acquire: Send + Sync {
    /// Try fresh random ids until one yields a valid item.
    ///
    /// Returns `AcquireError::Banned` as soon as any attempt sees a ban signal;
    /// the remaining attempts are not spent.
    async fn fetch_one_valid(&self) -> AcquireResult<Item>;

    /// Whether the upstream is currently refusing us.
    async fn is_banned(&self) -> bool;
}

/// The production pipeline over an [`Upstream`].
pub struct Acquirer {
    upstream: Arc<dyn Upstream>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<AvailabilityBreaker>,
    extractor: ImageExtractor,
    upstream_config: UpstreamConfig,
    ban_config: BanConfig,
}

impl Acquirer {
    pub fn new(
        config: &Config,
        upstream: Arc<dyn Upstream>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<AvailabilityBreaker>,
    ) -> Result<Self> {
        Ok(Self {
            upstream,
            limiter,
            breaker,
            extractor: ImageExtractor::new()?,
            upstream_config: config.upstream.clone(),
            ban_config: config.ban.clone(),
        })
    }

    /// Run the full pipeline for a single id.
    pub async fn fetch(&self, id: &str) -> AcquireResult<Item> {
        let page_url = format!(
            "{}/{}",
            self.upstream_config.base_url.trim_end_matches('/'),
            id
        );

        self.breaker.wait_for_availability(|| self.check_recovery()).await;
        self.limiter.acquire().await;

        let page = self.upstream.get_page(&page_url).await.map_err(|e| {
            log::debug!("[page] error for id={}: {}", id, e);
            AcquireError::transient(format!("page request failed: {e}"))
        })?;

        if self.ban_config.is_ban_status(page.status) {
            let reason = format!("status {}", page.status);
            self.breaker.trip(reason.clone()).await;
            return Err(AcquireError::banned(reason));
        }
        if page.status != 200 {
            log::debug!("[page] non-200 ({}) for id={}", page.status, id);
            return Err(AcquireError::transient(format!("page status {}", page.status)));
        }
        if let Some(keyword) = self.ban_config.find_keyword(&page.body) {
            let reason = format!("keyword match in html: {keyword}");
            self.breaker.trip(reason.clone()).await;
            return Err(AcquireError::banned(reason));
        }

        let image_url = self.resolve_image_url(id, &page.body)?;

        self.limiter.acquire().await;
        let response = self
            .upstream
            .get_image(&image_url, &page_url)
            .await
            .map_err(|e| {
                log::debug!("[img] error for id={}: {}", id, e);
                AcquireError::transient(format!("image request failed: {e}"))
            })?;

        if response.status != 200 {
            log::debug!("[img] non-200 ({}) for id={}", response.status, id);
            return Err(AcquireError::transient(format!(
                "image status {}",
                response.status
            )));
        }
        let content_type = response.content_type.unwrap_or_default();
        if !content_type.starts_with("image/") {
            log::debug!("[img] non-image content-type={} for id={}", content_type, id);
            return Err(AcquireError::transient(format!(
                "non-image content type '{content_type}'"
            )));
        }

        let image_bytes = read_capped(response.body, self.upstream_config.max_image_bytes)
            .await
            .inspect_err(|e| log::debug!("[img] {} for id={}", e, id))?;
        if image_bytes.is_empty() {
            log::debug!("[img] empty image for id={}", id);
            return Err(AcquireError::transient("empty image body"));
        }
        if looks_like_html(&image_bytes) {
            log::debug!("[img] looks like HTML, not image, id={}", id);
            return Err(AcquireError::transient("image body is HTML"));
        }

        Ok(Item {
            id: id.to_string(),
            page_url,
            content_type,
            image_bytes,
            original_image_url: image_url,
        })
    }

    /// Extract, normalize and filter the image URL from a page body.
    fn resolve_image_url(&self, id: &str, body: &str) -> AcquireResult<String> {
        let raw = self.extractor.extract(body).ok_or_else(|| {
            log::debug!("[parse] no img tag for id={}", id);
            AcquireError::transient("no image reference in page")
        })?;

        let url = normalize_image_url(&self.upstream_config.base_url, &raw).ok_or_else(|| {
            log::debug!("[parse] bad img url for id={}: {}", id, raw);
            AcquireError::transient(format!("malformed image url '{raw}'"))
        })?;

        if is_blocked_host(&url, &self.upstream_config.blocked_hosts) {
            log::debug!("[filter] blocked domain for id={}: {}", id, url);
            return Err(AcquireError::transient(format!("blocked host in '{url}'")));
        }
        if let Some(marker) = find_bad_marker(&url, &self.upstream_config.bad_url_markers) {
            log::debug!("[filter] bad pattern '{}' in url for id={}", marker, id);
            return Err(AcquireError::transient(format!("bad url marker '{marker}'")));
        }

        Ok(url)
    }

    /// Lightweight GET of the site root, outside the normal pipeline.
    async fn check_recovery(&self) -> bool {
        self.limiter.acquire().await;
        match self.upstream.get_page(&self.upstream_config.base_url).await {
            Ok(page) if page.status == 200 => true,
            Ok(page) => {
                log::warn!("[ban] recovery check failed with status {}", page.status);
                false
            }
            Err(e) => {
                log::warn!("[ban] recovery check error: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Acquire for Acquirer {
    async fn fetch_one_valid(&self) -> AcquireResult<Item> {
        let max_attempts = self.upstream_config.max_attempts;
        for attempt in 1..=max_attempts {
            let id = generate_id(self.upstream_config.id_length);
            log::debug!("[try] {}/{}, id={}", attempt, max_attempts, id);

            match self.fetch(&id).await {
                Ok(item) => {
                    log::info!("[ok] id={} ready for cache", id);
                    return Ok(item);
                }
                // Every further id would only queue behind the breaker
                Err(e) if e.is_ban_signal() => {
                    log::warn!("[fail] stopping after ban signal: {}", e);
                    return Err(e);
                }
                Err(_) => continue,
            }
        }

        log::warn!(
            "[fail] couldn't find valid screenshot after {} attempts",
            max_attempts
        );
        Err(AcquireError::Exhausted {
            attempts: max_attempts,
        })
    }

    async fn is_banned(&self) -> bool {
        self.breaker.is_banned().await
    }
}

/// Collect a streamed body, giving up as soon as it grows past `cap` bytes.
async fn read_capped(mut body: ByteStream, cap: usize) -> AcquireResult<Vec<u8>> {
    let mut buffer = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk =
            chunk.map_err(|e| AcquireError::transient(format!("image stream failed: {e}")))?;
        if buffer.len() + chunk.len() > cap {
            return Err(AcquireError::transient(format!("image too large (> {cap})")));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

/// Whether the first kilobyte looks like an HTML document.
pub fn looks_like_html(bytes: &[u8]) -> bool {
    let head = bytes[..bytes.len().min(SNIFF_LEN)].to_ascii_lowercase();
    contains(&head, b"<html") || contains(&head, b"<!doctype html")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
