// src/utils/http.rs

//! HTTP client utilities and the upstream seam.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, REFERER};

use crate::error::{AppError, Result};
use crate::models::UpstreamConfig;

/// Chunked image body as it arrives from the network.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// A fetched page. The body is only read for 200 responses.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

/// An image response whose body has not been consumed yet.
pub struct ImageResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

/// Outbound access to the screenshot site.
///
/// Implementations only move bytes; throttling, ban detection and validation
/// happen in the acquisition pipeline.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Plain GET of an HTML page.
    async fn get_page(&self, url: &str) -> Result<PageResponse>;

    /// Streaming GET of an image, sent with the page as referer.
    async fn get_image(&self, url: &str, referer: &str) -> Result<ImageResponse>;
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &UpstreamConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    let language = HeaderValue::from_str(&config.accept_language)
        .map_err(|e| AppError::config(format!("invalid accept_language: {e}")))?;
    headers.insert(ACCEPT_LANGUAGE, language);

    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .timeout(config.timeout())
        .build()?;
    Ok(client)
}

/// `reqwest`-backed upstream used in production.
#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn get_page(&self, url: &str) -> Result<PageResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = if status == StatusCode::OK {
            response.text().await?
        } else {
            String::new()
        };
        Ok(PageResponse {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_image(&self, url: &str, referer: &str) -> Result<ImageResponse> {
        let response = self.client.get(url).header(REFERER, referer).send().await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(AppError::from))
            .boxed();
        Ok(ImageResponse {
            status,
            content_type,
            body,
        })
    }
}
