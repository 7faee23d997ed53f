//! Keeps short-lived direct-media links for scraped videos playable.
//!
//! Direct URLs handed out by upstream player endpoints are signed and expire.
//! This crate records every URL observed for a video, decides when its direct
//! link is about to lapse, and re-resolves it on demand or in batches, with at
//! most one resolution per video in flight at a time.

pub mod config;
pub mod error;
pub mod expiry;
pub mod freshness;
pub mod http_retry;
pub mod inflight;
pub mod metrics;
pub mod model;
pub mod playback;
pub mod refresh;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod scraper;
pub mod server;
