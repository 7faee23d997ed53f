//! Playback resolution: hand out a direct URL that will stay valid for at
//! least the look-ahead window, refreshing first when it would not.

use crate::error::RefreshError;
use crate::freshness::{FreshnessPolicy, status_for};
use crate::model::{ParsedVideoSource, SourceStatus, SourceType, VideoId};
use crate::refresh::{RefreshCoordinator, RefreshReason};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Direct-media link ready to hand to a player
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayableSource {
    pub video_id: VideoId,
    pub title: String,
    pub page_url: String,
    pub direct_url: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// True when this call had to refresh (or join a refresh) first
    pub refreshed: bool,
    pub status: SourceStatus,
}

#[derive(Clone)]
pub struct PlaybackResolver {
    coordinator: RefreshCoordinator,
    policy: FreshnessPolicy,
}

impl PlaybackResolver {
    pub fn new(coordinator: RefreshCoordinator, policy: FreshnessPolicy) -> Self {
        Self {
            coordinator,
            policy,
        }
    }

    /// Current playable source for `video_id`.
    ///
    /// # Errors
    ///
    /// Refresh failures propagate unchanged. [`RefreshError::SourceUnavailable`]
    /// is returned when a refresh succeeded but left no usable URL.
    pub async fn get_playable(&self, video_id: VideoId) -> Result<PlayableSource, RefreshError> {
        let video = self
            .coordinator
            .registry()
            .find_video(video_id)
            .await?
            .ok_or(RefreshError::VideoNotFound(video_id))?;

        let now = Utc::now();
        let current = video.source(SourceType::DirectVideo);
        if !self.policy.should_refresh(current, now)
            && let Some(source) = current
        {
            debug!("Direct source for video {} is fresh", video_id);
            return Ok(playable(&video.title, &video.page_url, source, false, now));
        }

        debug!("Direct source for video {} is due, refreshing", video_id);
        let refreshed = self
            .coordinator
            .refresh(video_id, RefreshReason::OnDemand)
            .await?;

        refreshed
            .source(SourceType::DirectVideo)
            .filter(|source| !source.url.is_empty())
            .map(|source| playable(&refreshed.title, &refreshed.page_url, source, true, Utc::now()))
            .ok_or(RefreshError::SourceUnavailable(video_id))
    }
}

fn playable(
    title: &str,
    page_url: &str,
    source: &ParsedVideoSource,
    refreshed: bool,
    now: DateTime<Utc>,
) -> PlayableSource {
    PlayableSource {
        video_id: source.video_id,
        title: title.to_string(),
        page_url: page_url.to_string(),
        direct_url: source.url.clone(),
        expires_at: source.expires_at,
        refreshed,
        status: status_for(source.expires_at, now),
    }
}
