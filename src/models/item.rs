// src/models/item.rs

//! Screenshot items as they move from the upstream through the caches to a client.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default content type when upstream or metadata did not record one.
pub const DEFAULT_CONTENT_TYPE: &str = "image/png";

/// Data file extension used when the content type is unknown.
pub const DEFAULT_IMAGE_SUFFIX: &str = ".bin";

/// Shown next to cached items while the upstream is blocking us.
pub const BAN_NOTICE: &str = "Sorry, waiting for prnt.sc to unban us.";

/// A validated screenshot held fully in memory.
///
/// Items are built in one go by the acquisition pipeline once every check has
/// passed and are never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Short lowercase alphanumeric id, also the cache key
    pub id: String,

    /// Canonical page for the id
    pub page_url: String,

    /// MIME type reported by upstream
    pub content_type: String,

    /// Raw image payload
    pub image_bytes: Vec<u8>,

    /// Resolved direct image URL
    pub original_image_url: String,
}

impl Item {
    /// Disk file name for this item, `<id><ext>` with the extension inferred
    /// from the content type.
    pub fn disk_file_name(&self) -> String {
        format!("{}{}", self.id, extension_for(&self.content_type))
    }

    /// Render the bytes as a `data:` URL for inline embedding.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            STANDARD.encode(&self.image_bytes)
        )
    }
}

/// A disk-backed item that has been claimed for serving.
///
/// Carries the data file name instead of the bytes; the file stays on disk
/// until the transport layer reports it as served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskItem {
    pub id: String,
    pub page_url: String,
    pub content_type: String,
    pub disk_file_name: String,
    pub original_image_url: Option<String>,
}

/// Metadata persisted next to every overflowed data file as `<id>.json`.
///
/// Unknown fields are ignored so older binaries can read newer files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiskMeta {
    pub id: String,

    pub page_url: String,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    #[serde(default)]
    pub original_image_url: Option<String>,

    pub saved_at: DateTime<Utc>,

    /// Name of the paired data file; older entries may lack it
    #[serde(default)]
    pub file_name: Option<String>,
}

impl DiskMeta {
    /// Build the metadata record for an item about to be written.
    pub fn for_item(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            page_url: item.page_url.clone(),
            content_type: item.content_type.clone(),
            original_image_url: Some(item.original_image_url.clone()),
            saved_at: Utc::now(),
            file_name: Some(item.disk_file_name()),
        }
    }

    /// Paired data file name, falling back to `<id>.bin`.
    pub fn data_file_name(&self) -> String {
        self.file_name
            .clone()
            .unwrap_or_else(|| format!("{}{}", self.id, DEFAULT_IMAGE_SUFFIX))
    }

    pub fn into_disk_item(self) -> DiskItem {
        let disk_file_name = self.data_file_name();
        DiskItem {
            id: self.id,
            page_url: self.page_url,
            content_type: self.content_type,
            disk_file_name,
            original_image_url: self.original_image_url,
        }
    }
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

/// What the request resolver hands to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Servable {
    /// Bytes owned by the caller, rendered inline
    Inline(Item),
    /// File to stream from the disk cache, cleaned up via `mark_served`
    Disk(DiskItem),
}

impl Servable {
    pub fn id(&self) -> &str {
        match self {
            Servable::Inline(item) => &item.id,
            Servable::Disk(item) => &item.id,
        }
    }
}

/// Where the client should load the image from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Memory,
    Disk,
    External,
}

/// JSON payload returned for one served screenshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    pub id: String,
    pub page_url: String,
    pub original_image_url: Option<String>,
    pub image_url: Option<String>,
    pub image_source: ImageSource,
    /// Set while the upstream is blocking us and the item came from a cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban_notice: Option<String>,
}

impl Payload {
    /// Attach the ban notice when the upstream is currently blocking us.
    pub fn with_ban_notice(mut self, banned: bool) -> Self {
        self.ban_notice = banned.then(|| BAN_NOTICE.to_string());
        self
    }
}

impl From<&Servable> for Payload {
    fn from(servable: &Servable) -> Self {
        match servable {
            Servable::Inline(item) if !item.image_bytes.is_empty() => Payload {
                id: item.id.clone(),
                page_url: item.page_url.clone(),
                original_image_url: Some(item.original_image_url.clone()),
                image_url: Some(item.data_url()),
                image_source: ImageSource::Memory,
                ban_notice: None,
            },
            Servable::Inline(item) => Payload {
                id: item.id.clone(),
                page_url: item.page_url.clone(),
                original_image_url: Some(item.original_image_url.clone()),
                image_url: Some(item.original_image_url.clone()),
                image_source: ImageSource::External,
                ban_notice: None,
            },
            Servable::Disk(item) => Payload {
                id: item.id.clone(),
                page_url: item.page_url.clone(),
                original_image_url: item.original_image_url.clone(),
                image_url: Some(format!("/storage/{}", item.disk_file_name)),
                image_source: ImageSource::Disk,
                ban_notice: None,
            },
        }
    }
}

/// Map a content type to the data file extension, ignoring parameters.
pub fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        _ => DEFAULT_IMAGE_SUFFIX,
    }
}

/// Guess a content type from a data file name.
pub fn content_type_for_name(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
