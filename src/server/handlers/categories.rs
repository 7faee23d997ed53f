use crate::{
    error::Result,
    refresh::CategoryReport,
    server::{state::AppState, url_validation::validate_page_url},
};
use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseCategoryRequest {
    url: String,
    pages: Option<u32>,
    #[serde(default)]
    hydrate_videos: bool,
}

/// POST /categories/parse: list a category's videos, optionally storing each
pub async fn parse_category(
    State(state): State<AppState>,
    Json(request): Json<ParseCategoryRequest>,
) -> Result<Json<CategoryReport>> {
    let category_url = validate_page_url(&request.url)?;
    let pages = request.pages.unwrap_or(1);

    info!(
        "Parsing category {} ({} pages, hydrate: {})",
        category_url, pages, request.hydrate_videos
    );
    let report = state
        .coordinator
        .ingest_category(category_url.as_str(), pages, request.hydrate_videos)
        .await?;
    Ok(Json(report))
}
