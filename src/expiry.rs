//! Expiry extraction from signed CDN URLs.
//!
//! The upstream encodes the validity window as an `expires` query parameter
//! whose unit is not declared. The unit guess lives here, behind
//! [`ExpiryPolicy`], so it can be swapped if the upstream format changes.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt::Debug;
use url::Url;

/// Values above this are read as epoch milliseconds, otherwise epoch seconds.
pub const EPOCH_MILLIS_CUTOFF: i64 = 10_000_000_000;

/// Extracts the expiry instant embedded in a direct-media URL.
pub trait ExpiryPolicy: Send + Sync + Debug {
    /// `None` means freshness is unknown.
    fn expires_at(&self, url: &Url) -> Option<DateTime<Utc>>;
}

/// Reads an integer query parameter and disambiguates its unit by magnitude.
#[derive(Debug, Clone)]
pub struct QueryParamExpiry {
    param: String,
    millis_cutoff: i64,
}

impl QueryParamExpiry {
    pub fn new(param: impl Into<String>, millis_cutoff: i64) -> Self {
        Self {
            param: param.into(),
            millis_cutoff,
        }
    }
}

impl Default for QueryParamExpiry {
    fn default() -> Self {
        Self::new("expires", EPOCH_MILLIS_CUTOFF)
    }
}

impl ExpiryPolicy for QueryParamExpiry {
    fn expires_at(&self, url: &Url) -> Option<DateTime<Utc>> {
        let raw = url
            .query_pairs()
            .find(|(key, _)| key == self.param.as_str())
            .map(|(_, value)| value.into_owned())?;
        let value = leading_integer(&raw)?;
        epoch_to_utc(value, self.millis_cutoff)
    }
}

/// The optionally signed run of digits at the start of `raw`, ignoring
/// leading whitespace and anything after the digits (`1765000000.0`).
pub fn leading_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let sign_len = usize::from(trimmed.starts_with(['+', '-']));
    let digits_len = trimmed[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits_len == 0 {
        return None;
    }
    trimmed[..sign_len + digits_len].parse().ok()
}

/// Interpret `value` as epoch millis when above `millis_cutoff`, else seconds.
pub fn epoch_to_utc(value: i64, millis_cutoff: i64) -> Option<DateTime<Utc>> {
    if value > millis_cutoff {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}
