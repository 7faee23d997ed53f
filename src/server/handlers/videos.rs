use crate::{
    error::{RefreshError, Result},
    model::{ParsedVideo, VideoId},
    playback::PlayableSource,
    refresh::RefreshReason,
    scanner::ScanReport,
    server::{state::AppState, url_validation::validate_page_url},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

/// GET /videos: newest-updated first
pub async fn list_videos(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ParsedVideo>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0);

    let videos = state
        .coordinator
        .registry()
        .list_videos(limit, offset)
        .await
        .map_err(RefreshError::from)?;
    Ok(Json(videos))
}

/// GET /videos/{id}
pub async fn get_video(
    Path(id): Path<VideoId>,
    State(state): State<AppState>,
) -> Result<Json<ParsedVideo>> {
    let video = state
        .coordinator
        .registry()
        .find_video(id)
        .await
        .map_err(RefreshError::from)?
        .ok_or(RefreshError::VideoNotFound(id))?;
    Ok(Json(video))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    url: String,
    category_url: Option<String>,
    #[serde(default = "resolve_now_default")]
    resolve_now: bool,
}

fn resolve_now_default() -> bool {
    true
}

/// POST /videos/parse: scrape a page and store it
pub async fn parse_video(
    State(state): State<AppState>,
    Json(request): Json<ParseRequest>,
) -> Result<(StatusCode, Json<ParsedVideo>)> {
    let page_url = validate_page_url(&request.url)?;
    let category_url = request
        .category_url
        .as_deref()
        .map(validate_page_url)
        .transpose()?
        .map(String::from);

    info!("Parsing video page {}", page_url);
    let video = state
        .coordinator
        .ingest(page_url.as_str(), category_url, request.resolve_now)
        .await?;
    Ok((StatusCode::CREATED, Json(video)))
}

/// GET /videos/{id}/playable
pub async fn get_playable(
    Path(id): Path<VideoId>,
    State(state): State<AppState>,
) -> Result<Json<PlayableSource>> {
    Ok(Json(state.playback.get_playable(id).await?))
}

/// POST /videos/{id}/refresh: force a refresh regardless of freshness
pub async fn refresh_video(
    Path(id): Path<VideoId>,
    State(state): State<AppState>,
) -> Result<Json<ParsedVideo>> {
    let video = state.coordinator.refresh(id, RefreshReason::Manual).await?;
    Ok(Json(Arc::unwrap_or_clone(video)))
}

#[derive(Debug, Deserialize)]
pub struct ScanParams {
    limit: Option<usize>,
}

/// POST /videos/refresh-expiring: run one batch scan now
pub async fn refresh_expiring(
    State(state): State<AppState>,
    Query(params): Query<ScanParams>,
) -> Result<Json<ScanReport>> {
    Ok(Json(state.scanner.scan_and_refresh(params.limit).await?))
}
