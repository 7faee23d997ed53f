//! Refresh coordination.
//!
//! [`RefreshCoordinator`] is the single choke point through which direct
//! sources are re-resolved. At most one refresh per video runs at a time in
//! this process; concurrent requests join it and share its outcome.

use crate::error::RefreshError;
use crate::freshness::status_for;
use crate::inflight::{InFlight, Participation};
use crate::metrics;
use crate::model::{
    CategoryItem, ParsedVideo, ParsedVideoData, RefreshMark, SourceType, SourceUpsert, VideoId,
    VideoUpsert, normalize_tags,
};
use crate::registry::SourceRegistry;
use crate::resolver::LinkResolver;
use crate::scraper::{ParserSet, category_page_url};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Most listing pages walked by one category ingest.
pub const MAX_CATEGORY_PAGES: u32 = 100;

/// Outcome of one category ingest. Items are unique by page URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReport {
    pub site: String,
    pub category_url: String,
    pub pages: u32,
    pub items_found: usize,
    pub items_persisted: usize,
    pub items_hydrated: usize,
    pub items_failed: usize,
    pub items: Vec<CategoryItem>,
}

/// Why a refresh was requested; carried into logs and metrics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshReason {
    /// Explicit admin request
    Manual,
    /// Playback found the link stale
    OnDemand,
    /// Batch scanner
    Scheduled,
}

impl RefreshReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshReason::Manual => "manual",
            RefreshReason::OnDemand => "on-demand",
            RefreshReason::Scheduled => "scheduled",
        }
    }
}

/// Shared outcome of one refresh run
pub type RefreshOutcome = Result<Arc<ParsedVideo>, RefreshError>;

struct Inner {
    registry: SourceRegistry,
    resolver: Arc<dyn LinkResolver>,
    parsers: ParserSet,
    in_flight: InFlight<VideoId, Arc<ParsedVideo>, RefreshError>,
}

/// Orchestrates refreshes and the ingest of new pages.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        registry: SourceRegistry,
        resolver: Arc<dyn LinkResolver>,
        parsers: ParserSet,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                resolver,
                parsers,
                in_flight: InFlight::new(),
            }),
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.inner.registry
    }

    /// Whether a refresh for `video_id` is currently running
    pub fn is_refreshing(&self, video_id: VideoId) -> bool {
        self.inner.in_flight.is_in_flight(&video_id)
    }

    /// Re-resolve the direct source of a video, joining a running refresh
    /// for the same id instead of starting another.
    pub async fn refresh(&self, video_id: VideoId, reason: RefreshReason) -> RefreshOutcome {
        let this = self.clone();
        let (participation, outcome) = self
            .inner
            .in_flight
            .join_or_start(video_id, move || async move {
                let outcome = this.run_refresh(video_id, reason).await;
                match &outcome {
                    Ok(_) => metrics::record_refresh(reason.as_str(), "ok"),
                    Err(e) => {
                        warn!(
                            "Failed to refresh sources for video {} ({}): {}",
                            video_id,
                            reason.as_str(),
                            e
                        );
                        metrics::record_refresh(reason.as_str(), e.kind());
                    }
                }
                outcome
            })
            .await;

        if participation == Participation::Joined {
            debug!(
                "Joined in-flight refresh for video {} ({})",
                video_id,
                reason.as_str()
            );
            metrics::record_refresh_joined();
        }
        outcome
    }

    async fn run_refresh(&self, video_id: VideoId, reason: RefreshReason) -> RefreshOutcome {
        let registry = &self.inner.registry;
        let video = registry
            .find_video(video_id)
            .await?
            .ok_or(RefreshError::VideoNotFound(video_id))?;

        let player_url = match video.player_url() {
            Some(url) => url.to_string(),
            None => self.rescrape_player(&video).await?,
        };

        let resolved = match self.inner.resolver.resolve(&player_url, &video.page_url).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.record_failure(&video, &e).await;
                return Err(e);
            }
        };

        let now = Utc::now();
        registry
            .upsert_source(
                video.id,
                SourceUpsert {
                    source_type: SourceType::DirectVideo,
                    url: resolved.direct_url,
                    status: status_for(resolved.expires_at, now),
                    expires_at: resolved.expires_at,
                    last_error: None,
                    checked_at: now,
                },
            )
            .await?;
        registry
            .mark_checked(
                video.id,
                RefreshMark {
                    checked_at: now,
                    refreshed_at: Some(now),
                    needs_refresh: false,
                },
            )
            .await?;

        info!(
            "Refreshed direct source for video {}. Reason: {}",
            video.id,
            reason.as_str()
        );

        let refreshed = registry
            .find_video(video.id)
            .await?
            .ok_or(RefreshError::VideoNotFound(video.id))?;
        Ok(Arc::new(refreshed))
    }

    /// Scrape the page again for a player URL and persist what was observed.
    async fn rescrape_player(&self, video: &ParsedVideo) -> Result<String, RefreshError> {
        info!("No player source for video {}, re-scraping {}", video.id, video.page_url);

        let parser = self.inner.parsers.for_url(&video.page_url)?;
        let mut parsed = parser.parse_video(&video.page_url).await?;

        let Some(player_url) = parsed.player_source_url.clone() else {
            return Err(RefreshError::PlayerSourceMissing(format!("video {}", video.id)));
        };

        // Keep the row identity even if the page now reports another canonical URL
        parsed.site = video.site.clone();
        parsed.page_url = video.page_url.clone();
        self.persist(&parsed).await?;

        Ok(player_url)
    }

    /// Stamp the failure on the existing direct row, if any, and flag the video.
    async fn record_failure(&self, video: &ParsedVideo, error: &RefreshError) {
        let registry = &self.inner.registry;
        let now = Utc::now();

        if let Some(direct) = video.source(SourceType::DirectVideo) {
            let failed = SourceUpsert {
                source_type: SourceType::DirectVideo,
                url: direct.url.clone(),
                status: status_for(direct.expires_at, now),
                expires_at: direct.expires_at,
                last_error: Some(error.to_string()),
                checked_at: now,
            };
            if let Err(e) = registry.upsert_source(video.id, failed).await {
                warn!("Could not record failure for video {}: {}", video.id, e);
            }
        }

        let mark = RefreshMark {
            checked_at: now,
            refreshed_at: None,
            needs_refresh: true,
        };
        if let Err(e) = registry.mark_checked(video.id, mark).await {
            warn!("Could not flag video {} for refresh: {}", video.id, e);
        }
    }

    /// Scrape a page and store it, optionally resolving its direct URL first.
    ///
    /// Fails with [`RefreshError::PlayerSourceMissing`] when the page has no
    /// player endpoint.
    pub async fn ingest(
        &self,
        page_url: &str,
        category_url: Option<String>,
        resolve_now: bool,
    ) -> Result<ParsedVideo, RefreshError> {
        let parser = self.inner.parsers.for_url(page_url)?;
        let mut parsed = parser.parse_video(page_url).await?;

        let Some(player_url) = parsed.player_source_url.clone() else {
            return Err(RefreshError::PlayerSourceMissing(page_url.to_string()));
        };
        if category_url.is_some() {
            parsed.category_url = category_url;
        }

        if resolve_now {
            let resolved = self.inner.resolver.resolve(&player_url, &parsed.page_url).await?;
            parsed.direct_video_url = Some(resolved.direct_url);
            parsed.direct_video_expires_at = resolved.expires_at;
        }

        let video = self.persist(&parsed).await?;
        info!(
            "Stored video {} from {} (parser: {})",
            video.id,
            video.page_url,
            parser.site()
        );
        Ok(video)
    }

    /// Walk `pages` listing pages of a category and collect its videos.
    ///
    /// With `hydrate`, every item is scraped and stored (without resolving
    /// its direct URL) under `category_url`. Item failures are counted and
    /// never abort the run; a listing page that cannot be read does.
    pub async fn ingest_category(
        &self,
        category_url: &str,
        pages: u32,
        hydrate: bool,
    ) -> Result<CategoryReport, RefreshError> {
        let pages = pages.clamp(1, MAX_CATEGORY_PAGES);
        let parser = self.inner.parsers.for_url(category_url)?;

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for page in 1..=pages {
            let page_url = category_page_url(category_url, page)?;
            let listing = parser.parse_category(&page_url).await?;
            items.extend(
                listing
                    .items
                    .into_iter()
                    .filter(|item| seen.insert(item.page_url.clone())),
            );
        }

        let mut report = CategoryReport {
            site: parser.site().to_string(),
            category_url: category_url.to_string(),
            pages,
            items_found: items.len(),
            items_persisted: 0,
            items_hydrated: 0,
            items_failed: 0,
            items: Vec::new(),
        };

        if hydrate {
            for item in &items {
                match self
                    .ingest(&item.page_url, Some(category_url.to_string()), false)
                    .await
                {
                    Ok(_) => {
                        report.items_persisted += 1;
                        report.items_hydrated += 1;
                    }
                    Err(e) => {
                        report.items_failed += 1;
                        error!("Failed to hydrate video {}: {}", item.page_url, e);
                    }
                }
            }
        }

        info!(
            "Category {} parsed: {} items over {} pages ({} stored, {} failed)",
            category_url, report.items_found, pages, report.items_persisted, report.items_failed
        );
        report.items = items;
        Ok(report)
    }

    /// Upsert the video row, every source observed on its page and its tags.
    async fn persist(&self, parsed: &ParsedVideoData) -> Result<ParsedVideo, RefreshError> {
        let registry = &self.inner.registry;
        let now = Utc::now();

        let video = registry.upsert_video(VideoUpsert::from_parsed(parsed, now)).await?;

        for (source_type, url) in parsed.informational_sources() {
            registry
                .upsert_source(video.id, SourceUpsert::informational(source_type, url, now))
                .await?;
        }

        if let Some(direct_url) = &parsed.direct_video_url {
            registry
                .upsert_source(
                    video.id,
                    SourceUpsert {
                        source_type: SourceType::DirectVideo,
                        url: direct_url.clone(),
                        status: status_for(parsed.direct_video_expires_at, now),
                        expires_at: parsed.direct_video_expires_at,
                        last_error: None,
                        checked_at: now,
                    },
                )
                .await?;
        }

        registry
            .replace_tags(video.id, normalize_tags(&parsed.tags))
            .await?;

        registry
            .find_video(video.id)
            .await?
            .ok_or(RefreshError::VideoNotFound(video.id))
    }
}
