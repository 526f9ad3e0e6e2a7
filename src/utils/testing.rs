//! In-memory upstream and acquisition doubles for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::{AcquireError, AppError, Result};
use crate::models::Item;
use crate::pipeline::Acquire;
use crate::utils::http::{ImageResponse, PageResponse, Upstream};

pub(crate) const IMAGE_URL: &str = "https://image.prntscr.com/image/abc.png";

/// Page markup pointing at `image_url` through `og:image`.
pub(crate) fn page_with_image(image_url: &str) -> String {
    format!(
        r#"<html><head><meta property="og:image" content="{image_url}"></head><body></body></html>"#
    )
}

#[derive(Clone)]
pub(crate) enum PageReply {
    Status(u16, String),
    NetworkError,
}

#[derive(Clone)]
pub(crate) enum ImageReply {
    Body {
        status: u16,
        content_type: Option<String>,
        chunks: Vec<Vec<u8>>,
    },
    NetworkError,
}

impl ImageReply {
    pub(crate) fn png(bytes: Vec<u8>) -> Self {
        Self::Body {
            status: 200,
            content_type: Some("image/png".to_string()),
            chunks: vec![bytes],
        }
    }
}

/// Scripted upstream: per-URL page replies, a default page reply for
/// everything else, and one image reply for every image request.
pub(crate) struct ScriptedUpstream {
    pages: Mutex<HashMap<String, PageReply>>,
    default_page: Mutex<PageReply>,
    image: Mutex<ImageReply>,
    pub(crate) page_calls: AtomicUsize,
    pub(crate) image_calls: AtomicUsize,
}

impl ScriptedUpstream {
    /// Every page links `IMAGE_URL`, every image is a small PNG.
    pub(crate) fn healthy() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            default_page: Mutex::new(PageReply::Status(200, page_with_image(IMAGE_URL))),
            image: Mutex::new(ImageReply::png(vec![0x89, b'P', b'N', b'G', 1, 2, 3])),
            page_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_default_page(&self, reply: PageReply) {
        *self.default_page.lock().unwrap() = reply;
    }

    pub(crate) fn set_page(&self, url: &str, reply: PageReply) {
        self.pages.lock().unwrap().insert(url.to_string(), reply);
    }

    pub(crate) fn set_image(&self, reply: ImageReply) {
        *self.image.lock().unwrap() = reply;
    }

    pub(crate) fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn get_page(&self, url: &str) -> Result<PageResponse> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.default_page.lock().unwrap().clone());
        match reply {
            PageReply::Status(status, body) => Ok(PageResponse { status, body }),
            PageReply::NetworkError => Err(AppError::validation("connection reset")),
        }
    }

    async fn get_image(&self, _url: &str, _referer: &str) -> Result<ImageResponse> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.image.lock().unwrap().clone();
        match reply {
            ImageReply::Body {
                status,
                content_type,
                chunks,
            } => Ok(ImageResponse {
                status,
                content_type,
                body: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
            }),
            ImageReply::NetworkError => Err(AppError::validation("connection reset")),
        }
    }
}

/// A valid item as the pipeline would build it.
pub(crate) fn sample_item(id: &str) -> Item {
    Item {
        id: id.to_string(),
        page_url: format!("https://prnt.sc/{id}"),
        content_type: "image/png".to_string(),
        image_bytes: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
        original_image_url: format!("https://image.prntscr.com/image/{id}.png"),
    }
}

/// Scripted pipeline: queued replies first, then the fallback for every
/// further call.
pub(crate) struct ScriptedAcquire {
    replies: Mutex<VecDeque<std::result::Result<Item, AcquireError>>>,
    fallback: Mutex<Option<Item>>,
    banned: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedAcquire {
    /// Always returns a fresh copy of `item`.
    pub(crate) fn always(item: Item) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Some(item)),
            banned: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the queued replies in order, then exhaustion forever.
    pub(crate) fn sequence(replies: Vec<std::result::Result<Item, AcquireError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: Mutex::new(None),
            banned: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self::sequence(Vec::new())
    }

    pub(crate) fn set_banned(&self, banned: bool) {
        self.banned.store(banned, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Acquire for ScriptedAcquire {
    async fn fetch_one_valid(&self) -> std::result::Result<Item, AcquireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return reply;
        }
        match self.fallback.lock().unwrap().clone() {
            Some(item) => Ok(item),
            None => Err(AcquireError::Exhausted { attempts: 1 }),
        }
    }

    async fn is_banned(&self) -> bool {
        self.banned.load(Ordering::SeqCst)
    }
}
