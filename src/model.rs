//! Source registry records.
//!
//! A [`ParsedVideo`] is one scraped video page; it owns at most one
//! [`ParsedVideoSource`] per [`SourceType`]. Only `DirectVideo` sources carry
//! expiry semantics, every other type is informational and stays `Active`.
//! Tags scraped from the page are stored with the video and replaced as a
//! whole on every persist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Row identifier of a parsed video.
pub type VideoId = i64;

/// Kind of URL recorded for a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Page,
    Player,
    DirectVideo,
    Thumbnail,
    Poster,
    TrailerMp4,
    TrailerWebm,
    TimelineSpriteTemplate,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Page => "page",
            SourceType::Player => "player",
            SourceType::DirectVideo => "direct_video",
            SourceType::Thumbnail => "thumbnail",
            SourceType::Poster => "poster",
            SourceType::TrailerMp4 => "trailer_mp4",
            SourceType::TrailerWebm => "trailer_webm",
            SourceType::TimelineSpriteTemplate => "timeline_sprite_template",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Freshness of a recorded source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    /// Known to be valid until its expiry
    Active,
    /// Expiry unknown
    Stale,
    /// Expiry has passed
    Expired,
}

/// One current URL of a given type for a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedVideoSource {
    pub video_id: VideoId,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub url: String,
    pub status: SourceStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A scraped video page and its sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedVideo {
    pub id: VideoId,
    pub site: String,
    pub page_url: String,
    pub category_url: Option<String>,
    pub page_slug_id: Option<String>,
    pub media_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub duration_seconds: Option<u32>,
    pub needs_refresh: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sources: Vec<ParsedVideoSource>,
    #[serde(default)]
    pub tags: Vec<ParsedTag>,
}

impl ParsedVideo {
    /// The current source of the given type, if any.
    pub fn source(&self, source_type: SourceType) -> Option<&ParsedVideoSource> {
        self.sources.iter().find(|s| s.source_type == source_type)
    }

    /// URL of the player endpoint, ignoring empty rows.
    pub fn player_url(&self) -> Option<&str> {
        self.source(SourceType::Player)
            .map(|s| s.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

/// Kind of label a page attaches to a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    Tag,
    Category,
}

/// One label scraped from a video page, unique per (type, slug).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTag {
    pub name: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub tag_type: TagType,
    /// Row label the page groups the tag under, e.g. `Place`
    pub group_label: Option<String>,
}

impl ParsedTag {
    pub fn new(tag_type: TagType, slug: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            slug: slug.to_string(),
            tag_type,
            group_label: None,
        }
    }
}

/// Drop tags without a name or slug and keep the first of each (type, slug).
pub fn normalize_tags(tags: &[ParsedTag]) -> Vec<ParsedTag> {
    let mut seen = HashSet::new();
    tags.iter()
        .filter(|t| !t.name.trim().is_empty() && !t.slug.trim().is_empty())
        .filter(|t| seen.insert((t.tag_type, t.slug.clone())))
        .cloned()
        .collect()
}

/// One video linked from a category listing page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryItem {
    pub page_url: String,
    pub media_id: Option<String>,
    pub title: Option<String>,
    pub duration_seconds: Option<u32>,
    pub thumbnail_url: Option<String>,
}

/// Items found on one category listing page, in page order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCategory {
    pub site: String,
    pub category_url: String,
    pub items: Vec<CategoryItem>,
}

/// Structured result of scraping one video page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedVideoData {
    pub site: String,
    pub page_url: String,
    pub category_url: Option<String>,
    pub page_slug_id: Option<String>,
    pub media_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub duration_seconds: Option<u32>,
    pub thumbnail_url: Option<String>,
    pub poster_url: Option<String>,
    pub trailer_mp4_url: Option<String>,
    pub trailer_webm_url: Option<String>,
    pub timeline_sprite_template_url: Option<String>,
    pub player_source_url: Option<String>,
    pub direct_video_url: Option<String>,
    pub direct_video_expires_at: Option<DateTime<Utc>>,
    pub tags: Vec<ParsedTag>,
}

impl ParsedVideoData {
    /// Every informational (non-expiring) source observed on the page.
    ///
    /// The direct-media URL is excluded; it carries its own expiry.
    pub fn informational_sources(&self) -> Vec<(SourceType, &str)> {
        let candidates = [
            (SourceType::Page, Some(self.page_url.as_str())),
            (SourceType::Player, self.player_source_url.as_deref()),
            (SourceType::Thumbnail, self.thumbnail_url.as_deref()),
            (SourceType::Poster, self.poster_url.as_deref()),
            (SourceType::TrailerMp4, self.trailer_mp4_url.as_deref()),
            (SourceType::TrailerWebm, self.trailer_webm_url.as_deref()),
            (
                SourceType::TimelineSpriteTemplate,
                self.timeline_sprite_template_url.as_deref(),
            ),
        ];

        candidates
            .into_iter()
            .filter_map(|(kind, url)| url.filter(|u| !u.is_empty()).map(|u| (kind, u)))
            .collect()
    }
}

/// Write model for the (site, page URL) upsert of a video row.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoUpsert {
    pub site: String,
    pub page_url: String,
    /// `None` keeps whatever category was recorded before
    pub category_url: Option<String>,
    pub page_slug_id: Option<String>,
    pub media_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub duration_seconds: Option<u32>,
    pub needs_refresh: bool,
    pub checked_at: DateTime<Utc>,
}

impl VideoUpsert {
    pub fn from_parsed(data: &ParsedVideoData, checked_at: DateTime<Utc>) -> Self {
        Self {
            site: data.site.clone(),
            page_url: data.page_url.clone(),
            category_url: data.category_url.clone(),
            page_slug_id: data.page_slug_id.clone(),
            media_id: data.media_id.clone(),
            title: data.title.clone(),
            description: data.description.clone(),
            duration_seconds: data.duration_seconds,
            needs_refresh: data.direct_video_url.is_none(),
            checked_at,
        }
    }
}

/// Write model for the (video, type) upsert of a source row.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUpsert {
    pub source_type: SourceType,
    pub url: String,
    pub status: SourceStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl SourceUpsert {
    /// A non-expiring source, always `Active` once set.
    pub fn informational(source_type: SourceType, url: &str, checked_at: DateTime<Utc>) -> Self {
        Self {
            source_type,
            url: url.to_string(),
            status: SourceStatus::Active,
            expires_at: None,
            last_error: None,
            checked_at,
        }
    }
}

/// Bookkeeping written to a video after a refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshMark {
    pub checked_at: DateTime<Utc>,
    /// Set only when a new direct URL was obtained
    pub refreshed_at: Option<DateTime<Utc>>,
    pub needs_refresh: bool,
}
