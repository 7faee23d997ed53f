use crate::model::VideoId;
use crate::registry::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failure of a refresh, ingest or playback operation.
///
/// `Clone` so one outcome can be handed to every caller joined on the same
/// in-flight refresh.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("parsed video {0} not found")]
    VideoNotFound(VideoId),

    /// No player endpoint, even after re-scraping the page
    #[error("player source not found for {0}")]
    PlayerSourceMissing(String),

    /// Network or protocol failure talking to the player endpoint
    #[error("unable to resolve direct source from {url}: {reason}")]
    ResolutionFailed { url: String, reason: String },

    /// No usable direct URL after a refresh attempt
    #[error("direct source is unavailable for video {0}")]
    SourceUnavailable(VideoId),

    #[error("unsupported URL for parser: {0}")]
    UnsupportedUrl(String),

    #[error("page scrape failed: {0}")]
    Scrape(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("refresh task aborted: {0}")]
    TaskAborted(String),
}

impl RefreshError {
    pub fn resolution(url: &str, reason: impl ToString) -> Self {
        RefreshError::ResolutionFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short label used in metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshError::VideoNotFound(_) => "video_not_found",
            RefreshError::PlayerSourceMissing(_) => "player_source_missing",
            RefreshError::ResolutionFailed { .. } => "resolution_failed",
            RefreshError::SourceUnavailable(_) => "source_unavailable",
            RefreshError::UnsupportedUrl(_) => "unsupported_url",
            RefreshError::Scrape(_) => "scrape",
            RefreshError::Storage(_) => "storage",
            RefreshError::TaskAborted(_) => "aborted",
        }
    }
}

impl From<StoreError> for RefreshError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MissingVideo(id) => RefreshError::VideoNotFound(id),
            StoreError::Backend(msg) => RefreshError::Storage(msg),
        }
    }
}

impl From<tokio::task::JoinError> for RefreshError {
    fn from(e: tokio::task::JoinError) -> Self {
        RefreshError::TaskAborted(e.to_string())
    }
}

/// Errors surfaced at the HTTP boundary
#[derive(Debug, Error)]
pub enum PlaylinkError {
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl PlaylinkError {
    fn status(&self) -> StatusCode {
        match self {
            PlaylinkError::Refresh(e) => match e {
                RefreshError::VideoNotFound(_) => StatusCode::NOT_FOUND,
                RefreshError::UnsupportedUrl(_) => StatusCode::BAD_REQUEST,
                RefreshError::PlayerSourceMissing(_)
                | RefreshError::ResolutionFailed { .. }
                | RefreshError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                RefreshError::Scrape(_) => StatusCode::BAD_GATEWAY,
                RefreshError::Storage(_) | RefreshError::TaskAborted(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            PlaylinkError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            PlaylinkError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PlaylinkError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, PlaylinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_refresh_taxonomy() {
        assert!(matches!(
            RefreshError::from(StoreError::MissingVideo(7)),
            RefreshError::VideoNotFound(7)
        ));
        assert!(matches!(
            RefreshError::from(StoreError::Backend("down".into())),
            RefreshError::Storage(_)
        ));
    }

    #[test]
    fn http_status_mapping() {
        let cases = [
            (RefreshError::VideoNotFound(1), StatusCode::NOT_FOUND),
            (
                RefreshError::PlayerSourceMissing("video 1".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                RefreshError::resolution("https://p.example/1", "timeout"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (RefreshError::SourceUnavailable(1), StatusCode::SERVICE_UNAVAILABLE),
            (
                RefreshError::UnsupportedUrl("ftp://x".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(PlaylinkError::from(err).status(), expected);
        }
        assert_eq!(
            PlaylinkError::InvalidUrl("nope".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn resolution_message_names_url() {
        let err = RefreshError::resolution("https://p.example/1", "status 404");
        assert_eq!(
            err.to_string(),
            "unable to resolve direct source from https://p.example/1: status 404"
        );
    }
}
