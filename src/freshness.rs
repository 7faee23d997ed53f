//! Freshness decisions for direct-media sources.
//!
//! Pure functions over a recorded expiry and an injected `now`. Missing data
//! and "about to expire" are the same actionable state: both need a refresh
//! before the link is handed out.

use crate::model::{ParsedVideoSource, SourceStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default look-ahead window (15 minutes).
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(900);

/// Smallest look-ahead window accepted.
pub const MIN_REFRESH_THRESHOLD: Duration = Duration::from_secs(60);

/// Largest look-ahead window accepted (one week).
pub const MAX_REFRESH_THRESHOLD: Duration = Duration::from_secs(7 * 24 * 3600);

/// Look-ahead policy shared by the playback path and the batch scanner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreshnessPolicy {
    threshold: Duration,
}

impl FreshnessPolicy {
    /// Create a policy, clamping `threshold` into
    /// [`MIN_REFRESH_THRESHOLD`]..=[`MAX_REFRESH_THRESHOLD`].
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold: threshold.clamp(MIN_REFRESH_THRESHOLD, MAX_REFRESH_THRESHOLD),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Latest expiry that still counts as due at `now`.
    pub fn refresh_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let threshold = chrono::Duration::from_std(self.threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_REFRESH_THRESHOLD.as_secs() as i64));
        now.checked_add_signed(threshold)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True when the source is absent, has no URL, has no known expiry, or
    /// expires at or before `now + threshold`. The recorded status is ignored.
    pub fn should_refresh(&self, source: Option<&ParsedVideoSource>, now: DateTime<Utc>) -> bool {
        let Some(source) = source else {
            return true;
        };
        if source.url.is_empty() {
            return true;
        }
        match source.expires_at {
            None => true,
            Some(expires_at) => expires_at <= self.refresh_boundary(now),
        }
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_THRESHOLD)
    }
}

/// Status implied by an expiry: unknown is `Stale`, future is `Active`,
/// anything else is `Expired`.
pub fn status_for(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> SourceStatus {
    match expires_at {
        None => SourceStatus::Stale,
        Some(at) if at > now => SourceStatus::Active,
        Some(_) => SourceStatus::Expired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceType;
    use chrono::Duration as ChronoDuration;

    fn source(expires_at: Option<DateTime<Utc>>, status: SourceStatus) -> ParsedVideoSource {
        ParsedVideoSource {
            video_id: 1,
            source_type: SourceType::DirectVideo,
            url: "https://cdn.example/video.mp4?expires=1765000000".to_string(),
            status,
            expires_at,
            last_checked_at: None,
            last_error: None,
        }
    }

    #[test]
    fn status_for_covers_unknown_future_and_past() {
        let now = Utc::now();
        assert_eq!(status_for(None, now), SourceStatus::Stale);
        for minutes in [1, 30, 60 * 24] {
            let future = now + ChronoDuration::minutes(minutes);
            assert_eq!(status_for(Some(future), now), SourceStatus::Active);
            let past = now - ChronoDuration::minutes(minutes);
            assert_eq!(status_for(Some(past), now), SourceStatus::Expired);
        }
    }

    #[test]
    fn status_for_exact_now_is_expired() {
        let now = Utc::now();
        assert_eq!(status_for(Some(now), now), SourceStatus::Expired);
    }

    #[test]
    fn missing_data_requires_refresh() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        assert!(policy.should_refresh(None, now));
        assert!(policy.should_refresh(Some(&source(None, SourceStatus::Active)), now));

        let mut no_url = source(Some(now + ChronoDuration::hours(5)), SourceStatus::Active);
        no_url.url.clear();
        assert!(policy.should_refresh(Some(&no_url), now));
    }

    #[test]
    fn within_threshold_requires_refresh_regardless_of_status() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        for status in [SourceStatus::Active, SourceStatus::Stale, SourceStatus::Expired] {
            for minutes in [-60, 0, 5, 15] {
                let at = now + ChronoDuration::minutes(minutes);
                assert!(
                    policy.should_refresh(Some(&source(Some(at), status)), now),
                    "expiry {minutes}m from now with status {status:?} should refresh"
                );
            }
        }
    }

    #[test]
    fn beyond_threshold_is_usable() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        let at = now + ChronoDuration::minutes(60);
        assert!(!policy.should_refresh(Some(&source(Some(at), SourceStatus::Expired)), now));
    }

    #[test]
    fn threshold_is_clamped_to_minimum() {
        let policy = FreshnessPolicy::new(Duration::from_secs(1));
        assert_eq!(policy.threshold(), MIN_REFRESH_THRESHOLD);

        let now = Utc::now();
        assert_eq!(
            policy.refresh_boundary(now),
            now + ChronoDuration::seconds(60)
        );
    }

    #[test]
    fn huge_threshold_is_capped_and_boundary_never_overflows() {
        let policy = FreshnessPolicy::new(Duration::from_secs(10_000_000_000_000));
        assert_eq!(policy.threshold(), MAX_REFRESH_THRESHOLD);

        let now = Utc::now();
        assert_eq!(policy.refresh_boundary(now), now + ChronoDuration::days(7));
        assert_eq!(
            policy.refresh_boundary(DateTime::<Utc>::MAX_UTC),
            DateTime::<Utc>::MAX_UTC
        );
        assert!(policy.should_refresh(Some(&source(Some(now), SourceStatus::Active)), now));
    }
}
