//! Media pseudo-URIs, fetch URLs and storage keys
//!
//! Legacy image references look like
//! `wix:image://v1/<media-id>/<filename>#originWidth=...`, with the `:image`
//! kind optional. Only the media id matters: it is substituted into the
//! static-asset URL template, and its trailing extension decides the stored
//! content type.

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use super::AssetError;

pub const MEDIA_ID_PLACEHOLDER: &str = "{media_id}";

const PSEUDO_URI_PATTERN: &str = r"^[A-Za-z0-9_-]+(?::[A-Za-z]+)?://v1/([^/#?]+)/[^#?]*(?:[#?].*)?$";

/// Image role inside a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Primary,
    Gallery,
}

impl ImageRole {
    pub fn as_str(&self) -> &str {
        match self {
            ImageRole::Primary => "primary",
            ImageRole::Gallery => "gallery",
        }
    }
}

/// A parsed pseudo-URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub media_id: String,
    pub extension: &'static str,
    pub content_type: &'static str,
}

/// Resolves pseudo-URIs against a static-asset URL template
#[derive(Debug, Clone)]
pub struct MediaResolver {
    pattern: Regex,
    url_template: String,
}

impl MediaResolver {
    pub fn new(url_template: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(PSEUDO_URI_PATTERN)?,
            url_template: url_template.into(),
        })
    }

    /// Extract the media id; anything not matching the pattern is a format error
    pub fn parse(&self, uri: &str) -> Result<MediaRef, AssetError> {
        let media_id = self
            .pattern
            .captures(uri.trim())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| AssetError::Format(uri.to_string()))?;

        let (extension, content_type) = content_type_for(&media_id);
        Ok(MediaRef {
            media_id,
            extension,
            content_type,
        })
    }

    /// Public fetch URL for a media id
    pub fn fetch_url(&self, media_id: &str) -> String {
        self.url_template.replace(MEDIA_ID_PLACEHOLDER, media_id)
    }
}

/// Extension and content type from a trailing file extension, JPEG by default
pub fn content_type_for(name: &str) -> (&'static str, &'static str) {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => ("jpg", "image/jpeg"),
        "png" => ("png", "image/png"),
        "webp" => ("webp", "image/webp"),
        "gif" => ("gif", "image/gif"),
        "avif" => ("avif", "image/avif"),
        "svg" => ("svg", "image/svg+xml"),
        _ => ("jpg", "image/jpeg"),
    }
}

/// `properties/<record-id>/<role>-<index>-<unix-millis>-<8 hex>.<ext>`
pub fn storage_key(record_id: Uuid, role: ImageRole, index: usize, extension: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "properties/{}/{}-{}-{}-{}.{}",
        record_id,
        role.as_str(),
        index,
        Utc::now().timestamp_millis(),
        &suffix[..8],
        extension
    )
}
