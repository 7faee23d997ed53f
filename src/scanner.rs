//! Batch refresh of direct sources that are expired or about to expire.

use crate::error::RefreshError;
use crate::freshness::FreshnessPolicy;
use crate::metrics;
use crate::refresh::{RefreshCoordinator, RefreshReason};
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Batch size used when the caller gives none.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Largest batch accepted per run.
pub const MAX_BATCH_SIZE: usize = 200;

/// Clamp a requested batch size into `1..=MAX_BATCH_SIZE`.
pub fn clamp_batch_size(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_BATCH_SIZE).clamp(1, MAX_BATCH_SIZE)
}

/// Counts for one scan run. `refreshed + failed == checked`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub checked: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Selects due direct sources and refreshes them one at a time.
#[derive(Clone)]
pub struct BatchScanner {
    coordinator: RefreshCoordinator,
    policy: FreshnessPolicy,
    default_batch: usize,
}

impl BatchScanner {
    pub fn new(coordinator: RefreshCoordinator, policy: FreshnessPolicy) -> Self {
        Self {
            coordinator,
            policy,
            default_batch: DEFAULT_BATCH_SIZE,
        }
    }

    /// Batch size used by runs that pass no limit.
    pub fn with_default_batch(mut self, batch: usize) -> Self {
        self.default_batch = batch.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Refresh up to `limit` due sources, least recently checked first.
    ///
    /// Individual failures are counted and never abort the run; only a
    /// failure to select candidates is returned as an error.
    pub async fn scan_and_refresh(&self, limit: Option<usize>) -> Result<ScanReport, RefreshError> {
        let limit = clamp_batch_size(limit.or(Some(self.default_batch)));
        let boundary = self.policy.refresh_boundary(Utc::now());

        let candidates = self
            .coordinator
            .registry()
            .refresh_candidates(boundary, limit)
            .await?;
        debug!(
            "Scanning {} direct sources expiring before {}",
            candidates.len(),
            boundary
        );

        let mut report = ScanReport::default();
        for candidate in candidates {
            report.checked += 1;
            match self
                .coordinator
                .refresh(candidate.video_id, RefreshReason::Scheduled)
                .await
            {
                Ok(_) => {
                    report.refreshed += 1;
                    metrics::record_scan_item("refreshed");
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_scan_item("failed");
                    debug!("Scan item {} failed: {}", candidate.video_id, e);
                }
            }
        }

        if report.checked > 0 {
            info!(
                "Refresh scan done: {} checked, {} refreshed, {} failed",
                report.checked, report.refreshed, report.failed
            );
        }
        Ok(report)
    }

    /// Run [`Self::scan_and_refresh`] every `interval` until `shutdown` fires.
    ///
    /// The first run happens one interval after start. Runs never overlap: a
    /// slow run delays the next tick instead of stacking.
    pub fn spawn_periodic(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!("Refresh scheduler started (every {}s)", interval.as_secs());
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.scan_and_refresh(None).await {
                            error!("Refresh scan failed: {}", e);
                        }
                    }
                }
            }
            info!("Refresh scheduler stopped");
        })
    }
}
