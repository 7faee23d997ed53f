//! Resolution of player endpoints into direct-media URLs.
//!
//! The upstream player endpoint either answers with a redirect whose
//! `Location` is the signed CDN URL, or streams the video itself. Redirects
//! are never followed automatically; the first hop is the answer.

use crate::error::RefreshError;
use crate::expiry::{ExpiryPolicy, QueryParamExpiry};
use crate::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, header, redirect};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Browser-like User-Agent; the upstream rejects obvious bots.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";

/// Default bound on one resolution request.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);

/// A resolved direct-media link
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    pub direct_url: String,
    /// `None` when the URL carries no recognizable expiry
    pub expires_at: Option<DateTime<Utc>>,
}

/// Trait for direct-link resolution
///
/// Implementations perform a single attempt and never retry; the caller
/// records failures and decides when to try again.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Resolve `player_url`, sending `referer` as the originating page.
    async fn resolve(&self, player_url: &str, referer: &str) -> Result<ResolvedLink, RefreshError>;
}

/// Resolves over HTTP with a non-following client.
#[derive(Debug, Clone)]
pub struct HttpLinkResolver {
    client: Client,
    expiry: Arc<dyn ExpiryPolicy>,
}

impl HttpLinkResolver {
    /// Build a resolver whose requests time out after `timeout`.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(user_agent)
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            expiry: Arc::new(QueryParamExpiry::default()),
        })
    }

    /// Replace the expiry extraction policy.
    pub fn with_expiry_policy(mut self, expiry: Arc<dyn ExpiryPolicy>) -> Self {
        self.expiry = expiry;
        self
    }
}

#[async_trait]
impl LinkResolver for HttpLinkResolver {
    async fn resolve(&self, player_url: &str, referer: &str) -> Result<ResolvedLink, RefreshError> {
        let start = Instant::now();
        let player = Url::parse(player_url).map_err(|e| RefreshError::resolution(player_url, e))?;

        let sent = self
            .client
            .get(player.clone())
            .header(header::REFERER, referer)
            .header(header::ACCEPT, "*/*")
            .send()
            .await;
        metrics::record_resolve_duration(start, if sent.is_ok() { "ok" } else { "error" });
        let response = sent.map_err(|e| RefreshError::resolution(player_url, e))?;

        let status = response.status();
        let headers = response.headers();

        let redirected = if status.is_redirection() {
            headers
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|location| player.join(location))
                .transpose()
                .map_err(|e| RefreshError::resolution(player_url, format!("bad Location: {e}")))?
        } else {
            None
        };

        let direct = match redirected {
            Some(url) => url,
            None if status.is_success() && is_video_content(headers) => player,
            None => {
                return Err(RefreshError::resolution(
                    player_url,
                    format!("status {status} without redirect or video content"),
                ));
            }
        };

        let expires_at = self.expiry.expires_at(&direct);
        debug!(
            "Resolved {} -> {} (expires: {:?})",
            player_url, direct, expires_at
        );

        Ok(ResolvedLink {
            direct_url: direct.to_string(),
            expires_at,
        })
    }
}

fn is_video_content(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("video/"))
}
