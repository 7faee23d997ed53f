//! Video page scraping.
//!
//! Turning a page into [`ParsedVideoData`] is site specific; parsers plug in
//! behind [`VideoPageParser`] and are picked per URL by [`ParserSet`].
//! [`HtmlPageParser`] covers pages that embed a `<video id="player">` element
//! with schema.org / Open Graph metadata, and listing pages made of
//! `div.video` cards.

use crate::error::RefreshError;
use crate::http_retry::{RetryConfig, fetch_with_retry};
use crate::model::{
    CategoryItem, ParsedCategory, ParsedTag, ParsedVideoData, TagType, normalize_tags,
};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use ::scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Scraping collaborator used for ingest and for recovering a lost player URL
#[async_trait]
pub trait VideoPageParser: Send + Sync {
    /// Site identifier stored on every video this parser produces
    fn site(&self) -> &str;

    fn can_handle(&self, url: &str) -> bool;

    async fn parse_video(&self, page_url: &str) -> Result<ParsedVideoData, RefreshError>;

    /// Video links on one category listing page. Parsers without listing
    /// support reject every URL.
    async fn parse_category(&self, category_url: &str) -> Result<ParsedCategory, RefreshError> {
        Err(RefreshError::UnsupportedUrl(category_url.to_string()))
    }
}

/// Ordered list of parsers; the first that accepts a URL wins.
#[derive(Clone, Default)]
pub struct ParserSet {
    parsers: Vec<Arc<dyn VideoPageParser>>,
}

impl ParserSet {
    pub fn new(parsers: Vec<Arc<dyn VideoPageParser>>) -> Self {
        Self { parsers }
    }

    pub fn for_url(&self, url: &str) -> Result<Arc<dyn VideoPageParser>, RefreshError> {
        self.parsers
            .iter()
            .find(|p| p.can_handle(url))
            .cloned()
            .ok_or_else(|| RefreshError::UnsupportedUrl(url.to_string()))
    }
}

/// Generic parser for player pages
pub struct HtmlPageParser {
    site: String,
    /// Accepted hosts (subdomains included); empty accepts any http(s) URL
    hosts: Vec<String>,
    client: Client,
    headers: HeaderMap,
    retry: RetryConfig,
}

impl HtmlPageParser {
    pub fn new(site: impl Into<String>, hosts: Vec<String>, client: Client, user_agent: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));

        Self {
            site: site.into(),
            hosts: hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect(),
            client,
            headers,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch `url` (fragment dropped) and return the final URL with its body.
    async fn fetch_html(&self, url: &str) -> Result<(Url, String), RefreshError> {
        let mut normalized =
            Url::parse(url).map_err(|_| RefreshError::UnsupportedUrl(url.to_string()))?;
        normalized.set_fragment(None);

        let response = fetch_with_retry(&self.client, normalized.as_str(), &self.headers, &self.retry)
            .await
            .map_err(|e| RefreshError::Scrape(format!("failed to fetch {}: {}", normalized, e)))?;
        let html = response
            .text()
            .await
            .map_err(|e| RefreshError::Scrape(format!("failed to read {}: {}", normalized, e)))?;
        Ok((normalized, html))
    }
}

#[async_trait]
impl VideoPageParser for HtmlPageParser {
    fn site(&self) -> &str {
        &self.site
    }

    fn can_handle(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str().map(|h| h.to_ascii_lowercase()) else {
            return false;
        };
        self.hosts.is_empty()
            || self
                .hosts
                .iter()
                .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    }

    async fn parse_video(&self, page_url: &str) -> Result<ParsedVideoData, RefreshError> {
        let (normalized, html) = self.fetch_html(page_url).await?;

        let parsed = extract_video_page(&html, &normalized, &self.site);
        if parsed.player_source_url.is_none() {
            warn!("No player source on {}", normalized);
        }
        debug!(
            "Parsed video page {} ({}, {} tags)",
            parsed.page_url,
            parsed.title,
            parsed.tags.len()
        );
        Ok(parsed)
    }

    async fn parse_category(&self, category_url: &str) -> Result<ParsedCategory, RefreshError> {
        let (normalized, html) = self.fetch_html(category_url).await?;

        let parsed = extract_category_page(&html, &normalized, &self.site);
        debug!("Parsed category page {} ({} items)", normalized, parsed.items.len());
        Ok(parsed)
    }
}

/// Extract video metadata and source URLs from a player page.
pub fn extract_video_page(html: &str, page_url: &Url, site: &str) -> ParsedVideoData {
    let doc = Html::parse_document(html);

    let canonical = first(&doc, r#"link[rel="canonical"]"#)
        .and_then(|e| e.value().attr("href"))
        .and_then(|href| page_url.join(href).ok())
        .unwrap_or_else(|| page_url.clone());
    let absolute = |value: Option<&str>| -> Option<String> {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|v| canonical.join(v).ok())
            .map(String::from)
    };

    let title = first(&doc, r#"h1[itemprop="name"]"#)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .or_else(|| meta_content(&doc, r#"meta[property="og:title"]"#))
        .unwrap_or_else(|| canonical.to_string());

    let description = first(&doc, r#"[itemprop="description"]"#)
        .map(|e| e.value().attr("content").map(String::from).unwrap_or_else(|| text_of(e)))
        .filter(|d| !d.is_empty())
        .or_else(|| meta_content(&doc, r#"meta[property="og:description"]"#));

    let duration_seconds = meta_content(&doc, r#"meta[itemprop="duration"]"#)
        .and_then(|d| parse_iso_duration(&d));

    let player = first(&doc, "video#player");
    let player_source_url = absolute(
        first(&doc, "video#player source[src]")
            .and_then(|e| e.value().attr("src"))
            .or_else(|| player.and_then(|e| e.value().attr("src"))),
    );
    let poster_url = absolute(player.and_then(|e| e.value().attr("poster")));
    let media_id = player
        .and_then(|e| e.value().attr("data-media-id"))
        .map(String::from);

    let thumbnail_url = absolute(
        first(&doc, r#"link[itemprop="thumbnailUrl"]"#)
            .and_then(|e| e.value().attr("href"))
            .or_else(|| {
                first(&doc, r#"meta[property="og:image"]"#).and_then(|e| e.value().attr("content"))
            }),
    );

    let trailer = |mime: &str| {
        absolute(
            first(&doc, &format!(r#"video.trailer source[type="{mime}"]"#))
                .and_then(|e| e.value().attr("src")),
        )
    };
    let trailer_mp4_url = trailer("video/mp4");
    let trailer_webm_url = trailer("video/webm");

    // Sprite templates carry a literal `{d}` frame placeholder
    let timeline_sprite_template_url = absolute(
        player.and_then(|e| e.value().attr("data-timeline-sprite")),
    )
    .map(|u| u.replace("%7Bd%7D", "{d}").replace("%7bd%7d", "{d}"));

    let tags = extract_tags(&doc, &canonical);

    ParsedVideoData {
        site: site.to_string(),
        page_url: canonical.to_string(),
        category_url: None,
        page_slug_id: page_slug_id(&canonical),
        media_id,
        title,
        description,
        duration_seconds,
        thumbnail_url,
        poster_url,
        trailer_mp4_url,
        trailer_webm_url,
        timeline_sprite_template_url,
        player_source_url,
        direct_video_url: None,
        direct_video_expires_at: None,
        tags,
    }
}

/// Tags from `div.tags` (grouped by the label of their `.info-row`) and
/// categories from `div.categories`, deduped by (type, slug).
fn extract_tags(doc: &Html, base: &Url) -> Vec<ParsedTag> {
    let (Ok(tag_links), Ok(category_links), Ok(label)) = (
        Selector::parse("div.tags a[href]"),
        Selector::parse("div.categories a[href]"),
        Selector::parse(".info-row-label"),
    ) else {
        return Vec::new();
    };

    let link_tag = |link: ElementRef<'_>, tag_type: TagType| -> Option<ParsedTag> {
        let slug = link
            .value()
            .attr("href")
            .and_then(|href| base.join(href).ok())
            .and_then(|url| last_segment(&url))?;
        let mut tag = ParsedTag::new(tag_type, &slug, &text_of(link));
        tag.group_label = link
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().classes().any(|c| c == "info-row"))
            .and_then(|row| row.select(&label).next())
            .map(|l| text_of(l).trim_end_matches(':').trim().to_string())
            .filter(|l| !l.is_empty());
        Some(tag)
    };

    let tags: Vec<ParsedTag> = doc
        .select(&tag_links)
        .filter_map(|link| link_tag(link, TagType::Tag))
        .chain(
            doc.select(&category_links)
                .filter_map(|link| link_tag(link, TagType::Category)),
        )
        .collect();
    normalize_tags(&tags)
}

/// Extract the video cards of a category listing page, deduped by page URL.
pub fn extract_category_page(html: &str, page_url: &Url, site: &str) -> ParsedCategory {
    let doc = Html::parse_document(html);
    let mut category = ParsedCategory {
        site: site.to_string(),
        category_url: page_url.to_string(),
        items: Vec::new(),
    };

    let (Ok(cards), Ok(link), Ok(image), Ok(title), Ok(duration)) = (
        Selector::parse("div.video"),
        Selector::parse("a[href]"),
        Selector::parse("img[src]"),
        Selector::parse(".title"),
        Selector::parse(".duration"),
    ) else {
        return category;
    };

    let mut seen = HashSet::new();
    for card in doc.select(&cards) {
        let Some(mut item_url) = card
            .select(&link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| page_url.join(href).ok())
        else {
            continue;
        };
        item_url.set_fragment(None);
        if !seen.insert(item_url.to_string()) {
            continue;
        }

        let media_id = card
            .value()
            .attr("data-media-id")
            .or_else(|| card.value().attr("id"))
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
            .map(String::from);

        category.items.push(CategoryItem {
            page_url: item_url.to_string(),
            media_id,
            title: card.select(&title).next().map(text_of).filter(|t| !t.is_empty()),
            duration_seconds: card
                .select(&duration)
                .next()
                .and_then(|d| parse_clock_duration(&text_of(d))),
            thumbnail_url: card
                .select(&image)
                .next()
                .and_then(|img| img.value().attr("src"))
                .and_then(|src| page_url.join(src).ok())
                .map(String::from),
        });
    }
    category
}

/// URL of listing page `page` (1-based): the first page is `base` itself,
/// later pages set the `page` query parameter.
pub fn category_page_url(base: &str, page: u32) -> Result<String, RefreshError> {
    if page <= 1 {
        return Ok(base.to_string());
    }
    let mut url = Url::parse(base).map_err(|_| RefreshError::UnsupportedUrl(base.to_string()))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("page", &page.to_string());
    Ok(url.into())
}

fn first<'a>(doc: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector).next()
}

fn meta_content(doc: &Html, css: &str) -> Option<String> {
    first(doc, css)
        .and_then(|e| e.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Visible text with whitespace collapsed
fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse `PT#H#M#S` (each part optional) into seconds.
pub fn parse_iso_duration(input: &str) -> Option<u32> {
    let body = input.trim();
    let body = body
        .strip_prefix("PT")
        .or_else(|| body.strip_prefix("pt"))?;
    if body.is_empty() {
        return None;
    }

    let mut total: u32 = 0;
    let mut digits = String::new();
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c.to_ascii_uppercase() {
            'H' => 3600,
            'M' => 60,
            'S' => 1,
            _ => return None,
        };
        let value: u32 = digits.parse().ok()?;
        total = total.checked_add(value.checked_mul(unit)?)?;
        digits.clear();
    }
    digits.is_empty().then_some(total)
}

/// Parse `MM:SS` or `H:MM:SS` into seconds.
pub fn parse_clock_duration(input: &str) -> Option<u32> {
    let parts: Vec<&str> = input.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    parts.iter().try_fold(0u32, |total, part| {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        total.checked_mul(60)?.checked_add(part.parse().ok()?)
    })
}

fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .rev()
        .find(|s| !s.is_empty())
        .map(String::from)
}

/// Numeric id at the end of the last path segment, e.g. `clip-title-1234`.
pub fn page_slug_id(url: &Url) -> Option<String> {
    let last = url.path_segments()?.rev().find(|s| !s.is_empty())?;
    let (_, id) = last.rsplit_once('-')?;
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}
