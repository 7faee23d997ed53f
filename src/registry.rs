use crate::model::{
    ParsedTag, ParsedVideo, ParsedVideoSource, RefreshMark, SourceType, SourceUpsert, VideoId,
    VideoUpsert,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

#[cfg(feature = "valkey")]
use tracing::info;

#[cfg(feature = "valkey")]
use redis::aio::ConnectionManager;

/// Errors raised by a registry backend
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("video {0} does not exist")]
    MissingVideo(VideoId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "valkey")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

#[cfg(feature = "valkey")]
impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(format!("corrupt video record: {e}"))
    }
}

/// In-memory tables: videos by id plus the (site, page URL) unique index
#[derive(Debug, Default)]
struct MemoryTables {
    videos: DashMap<VideoId, ParsedVideo>,
    keys: DashMap<(String, String), VideoId>,
    next_id: AtomicI64,
}

/// Internal storage backend
#[derive(Clone)]
enum Backend {
    Memory {
        tables: Arc<MemoryTables>,
    },
    #[cfg(feature = "valkey")]
    Valkey {
        conn: ConnectionManager,
        key_prefix: String,
    },
}

/// Persisted videos and their sources, with one API over every backend.
///
/// Every write is an idempotent upsert keyed on (site, page URL) for videos
/// and on (video, source type) for sources. No write spans more than one row,
/// and each write only touches the fields it owns, so concurrent writers of
/// different fields never undo each other.
#[derive(Clone)]
pub struct SourceRegistry {
    backend: Backend,
}

impl SourceRegistry {
    /// Create an in-memory registry (default)
    pub fn new_memory() -> Self {
        Self {
            backend: Backend::Memory {
                tables: Arc::new(MemoryTables::default()),
            },
        }
    }

    /// Create a Valkey-backed registry
    #[cfg(feature = "valkey")]
    pub async fn new_valkey(url: &str) -> Result<Self, redis::RedisError> {
        Self::new_valkey_with_prefix(url, "playlink").await
    }

    /// Create a Valkey-backed registry with every key under `key_prefix`
    #[cfg(feature = "valkey")]
    pub async fn new_valkey_with_prefix(
        url: &str,
        key_prefix: &str,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Valkey at {}", url);
        Ok(Self {
            backend: Backend::Valkey {
                conn,
                key_prefix: key_prefix.to_string(),
            },
        })
    }

    /// Point lookup of a video with all of its sources
    pub async fn find_video(&self, id: VideoId) -> Result<Option<ParsedVideo>, StoreError> {
        match &self.backend {
            Backend::Memory { tables } => Ok(tables.videos.get(&id).map(|v| v.clone())),
            #[cfg(feature = "valkey")]
            Backend::Valkey { conn, key_prefix } => {
                valkey::load(&mut conn.clone(), key_prefix, id).await
            }
        }
    }

    /// Most recently updated videos first
    pub async fn list_videos(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ParsedVideo>, StoreError> {
        match &self.backend {
            Backend::Memory { tables } => {
                let mut videos: Vec<ParsedVideo> =
                    tables.videos.iter().map(|v| v.value().clone()).collect();
                videos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
                Ok(videos.into_iter().skip(offset).take(limit).collect())
            }
            #[cfg(feature = "valkey")]
            Backend::Valkey { conn, key_prefix } => {
                valkey::list(&mut conn.clone(), key_prefix, limit, offset).await
            }
        }
    }

    /// Insert or update the video identified by (site, page URL)
    pub async fn upsert_video(&self, upsert: VideoUpsert) -> Result<ParsedVideo, StoreError> {
        match &self.backend {
            Backend::Memory { tables } => {
                let key = (upsert.site.clone(), upsert.page_url.clone());
                let id = *tables
                    .keys
                    .entry(key)
                    .or_insert_with(|| tables.next_id.fetch_add(1, Ordering::SeqCst) + 1);

                let mut row = tables
                    .videos
                    .entry(id)
                    .or_insert_with(|| new_video(id, &upsert));
                apply_video_upsert(&mut row, upsert);
                Ok(row.clone())
            }
            #[cfg(feature = "valkey")]
            Backend::Valkey { conn, key_prefix } => {
                valkey::upsert_video(&mut conn.clone(), key_prefix, upsert).await
            }
        }
    }

    /// Insert or replace the source of `source.source_type` for a video
    pub async fn upsert_source(
        &self,
        video_id: VideoId,
        source: SourceUpsert,
    ) -> Result<ParsedVideoSource, StoreError> {
        match &self.backend {
            Backend::Memory { tables } => {
                let mut video = tables
                    .videos
                    .get_mut(&video_id)
                    .ok_or(StoreError::MissingVideo(video_id))?;
                let row = source_row(video_id, source);
                put_source(&mut video, row.clone());
                Ok(row)
            }
            #[cfg(feature = "valkey")]
            Backend::Valkey { conn, key_prefix } => {
                let row = source_row(video_id, source);
                valkey::put_source(&mut conn.clone(), key_prefix, &row).await?;
                Ok(row)
            }
        }
    }

    /// Record the outcome of a refresh attempt on the video row
    pub async fn mark_checked(&self, video_id: VideoId, mark: RefreshMark) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Memory { tables } => {
                let mut video = tables
                    .videos
                    .get_mut(&video_id)
                    .ok_or(StoreError::MissingVideo(video_id))?;
                apply_mark(&mut video, mark);
                Ok(())
            }
            #[cfg(feature = "valkey")]
            Backend::Valkey { conn, key_prefix } => {
                valkey::mark_checked(&mut conn.clone(), key_prefix, video_id, mark).await
            }
        }
    }

    /// Replace the tag set of a video as a whole
    pub async fn replace_tags(
        &self,
        video_id: VideoId,
        tags: Vec<ParsedTag>,
    ) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Memory { tables } => {
                let mut video = tables
                    .videos
                    .get_mut(&video_id)
                    .ok_or(StoreError::MissingVideo(video_id))?;
                video.tags = tags;
                Ok(())
            }
            #[cfg(feature = "valkey")]
            Backend::Valkey { conn, key_prefix } => {
                valkey::replace_tags(&mut conn.clone(), key_prefix, video_id, &tags).await
            }
        }
    }

    /// Direct-video sources with no expiry or expiring at or before `boundary`,
    /// oldest `last_checked_at` first (never-checked rows lead), at most `limit`.
    pub async fn refresh_candidates(
        &self,
        boundary: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ParsedVideoSource>, StoreError> {
        let due = match &self.backend {
            Backend::Memory { tables } => tables
                .videos
                .iter()
                .filter_map(|v| v.source(SourceType::DirectVideo).cloned())
                .collect::<Vec<_>>(),
            #[cfg(feature = "valkey")]
            Backend::Valkey { conn, key_prefix } => {
                valkey::due_direct_sources(&mut conn.clone(), key_prefix, boundary).await?
            }
        };

        Ok(select_candidates(due, boundary, limit))
    }
}

fn select_candidates(
    sources: Vec<ParsedVideoSource>,
    boundary: DateTime<Utc>,
    limit: usize,
) -> Vec<ParsedVideoSource> {
    let mut due: Vec<ParsedVideoSource> = sources
        .into_iter()
        .filter(|s| s.expires_at.is_none_or(|at| at <= boundary))
        .collect();
    due.sort_by(|a, b| {
        a.last_checked_at
            .cmp(&b.last_checked_at)
            .then(a.video_id.cmp(&b.video_id))
    });
    due.truncate(limit);
    due
}

fn new_video(id: VideoId, upsert: &VideoUpsert) -> ParsedVideo {
    ParsedVideo {
        id,
        site: upsert.site.clone(),
        page_url: upsert.page_url.clone(),
        category_url: None,
        page_slug_id: None,
        media_id: None,
        title: String::new(),
        description: None,
        duration_seconds: None,
        needs_refresh: true,
        last_checked_at: None,
        last_refreshed_at: None,
        created_at: upsert.checked_at,
        updated_at: upsert.checked_at,
        sources: Vec::new(),
        tags: Vec::new(),
    }
}

fn apply_video_upsert(video: &mut ParsedVideo, upsert: VideoUpsert) {
    video.site = upsert.site;
    video.page_url = upsert.page_url;
    if upsert.category_url.is_some() {
        video.category_url = upsert.category_url;
    }
    video.page_slug_id = upsert.page_slug_id;
    video.media_id = upsert.media_id;
    video.title = upsert.title;
    video.description = upsert.description;
    video.duration_seconds = upsert.duration_seconds;
    video.needs_refresh = upsert.needs_refresh;
    video.last_checked_at = Some(upsert.checked_at);
    video.updated_at = upsert.checked_at;
}

fn source_row(video_id: VideoId, source: SourceUpsert) -> ParsedVideoSource {
    ParsedVideoSource {
        video_id,
        source_type: source.source_type,
        url: source.url,
        status: source.status,
        expires_at: source.expires_at,
        last_checked_at: Some(source.checked_at),
        last_error: source.last_error,
    }
}

fn put_source(video: &mut ParsedVideo, row: ParsedVideoSource) {
    match video
        .sources
        .iter_mut()
        .find(|s| s.source_type == row.source_type)
    {
        Some(existing) => *existing = row,
        None => video.sources.push(row),
    }
}

fn apply_mark(video: &mut ParsedVideo, mark: RefreshMark) {
    video.last_checked_at = Some(mark.checked_at);
    if let Some(refreshed_at) = mark.refreshed_at {
        video.last_refreshed_at = Some(refreshed_at);
    }
    video.needs_refresh = mark.needs_refresh;
    video.updated_at = mark.checked_at;
}

#[cfg(feature = "valkey")]
mod valkey {
    //! Key layout under `{prefix}`:
    //! - `video:{id}` hash of video fields, each value JSON encoded
    //! - `video:{id}:sources` hash of source type to JSON source row
    //! - `video:{id}:tags` JSON array of tags
    //! - `video-keys` hash of `site|page_url` to id
    //! - `video-seq` id counter
    //! - `updated` sorted set of ids by `updated_at` millis
    //! - `direct-due` sorted set of ids by direct expiry millis (0 when unknown)
    //!
    //! Every write is one `MULTI`/`EXEC` pipeline setting only the fields it
    //! owns. Nothing is read back and rewritten, so a refresh and an ingest of
    //! the same video cannot overwrite each other's fields.

    use super::*;
    use redis::aio::ConnectionManager;
    use serde::Serialize;
    use serde_json::{Map, Value};
    use std::collections::HashMap;

    fn video_key(prefix: &str, id: VideoId) -> String {
        format!("{}:video:{}", prefix, id)
    }

    fn sources_key(prefix: &str, id: VideoId) -> String {
        format!("{}:video:{}:sources", prefix, id)
    }

    fn tags_key(prefix: &str, id: VideoId) -> String {
        format!("{}:video:{}:tags", prefix, id)
    }

    fn field<T: Serialize>(name: &'static str, value: &T) -> Result<(&'static str, String), StoreError> {
        Ok((name, serde_json::to_string(value)?))
    }

    /// Redis ranks are signed 64-bit
    fn rank(value: usize) -> i64 {
        i64::try_from(value).unwrap_or(i64::MAX)
    }

    pub(super) async fn load(
        conn: &mut ConnectionManager,
        prefix: &str,
        id: VideoId,
    ) -> Result<Option<ParsedVideo>, StoreError> {
        let (fields, sources, tags): (HashMap<String, String>, HashMap<String, String>, Option<String>) =
            redis::pipe()
                .atomic()
                .hgetall(video_key(prefix, id))
                .hgetall(sources_key(prefix, id))
                .get(tags_key(prefix, id))
                .query_async(conn)
                .await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let mut record = Map::new();
        for (name, json) in fields {
            record.insert(name, serde_json::from_str(&json)?);
        }

        let mut sources = sources
            .values()
            .map(|json| serde_json::from_str::<ParsedVideoSource>(json))
            .collect::<Result<Vec<_>, _>>()?;
        sources.sort_by_key(|s| s.source_type);
        record.insert("sources".to_string(), serde_json::to_value(sources)?);

        let tags = match tags {
            Some(json) => serde_json::from_str(&json)?,
            None => Value::Array(Vec::new()),
        };
        record.insert("tags".to_string(), tags);

        Ok(Some(serde_json::from_value(Value::Object(record))?))
    }

    async fn ensure_video(
        conn: &mut ConnectionManager,
        prefix: &str,
        id: VideoId,
    ) -> Result<(), StoreError> {
        let exists: bool = redis::cmd("EXISTS")
            .arg(video_key(prefix, id))
            .query_async(conn)
            .await?;
        if exists {
            Ok(())
        } else {
            Err(StoreError::MissingVideo(id))
        }
    }

    pub(super) async fn put_source(
        conn: &mut ConnectionManager,
        prefix: &str,
        row: &ParsedVideoSource,
    ) -> Result<(), StoreError> {
        ensure_video(conn, prefix, row.video_id).await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(
                sources_key(prefix, row.video_id),
                row.source_type.as_str(),
                serde_json::to_string(row)?,
            )
            .ignore();
        if row.source_type == SourceType::DirectVideo {
            let score = row.expires_at.map_or(0, |at| at.timestamp_millis());
            pipe.zadd(format!("{}:direct-due", prefix), row.video_id, score)
                .ignore();
        }
        pipe.query_async::<()>(conn).await?;
        Ok(())
    }

    pub(super) async fn mark_checked(
        conn: &mut ConnectionManager,
        prefix: &str,
        id: VideoId,
        mark: RefreshMark,
    ) -> Result<(), StoreError> {
        ensure_video(conn, prefix, id).await?;

        let mut fields = vec![
            field("last_checked_at", &mark.checked_at)?,
            field("needs_refresh", &mark.needs_refresh)?,
            field("updated_at", &mark.checked_at)?,
        ];
        if let Some(refreshed_at) = mark.refreshed_at {
            fields.push(field("last_refreshed_at", &refreshed_at)?);
        }

        redis::pipe()
            .atomic()
            .hset_multiple(video_key(prefix, id), &fields)
            .ignore()
            .zadd(format!("{}:updated", prefix), id, mark.checked_at.timestamp_millis())
            .ignore()
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }

    pub(super) async fn replace_tags(
        conn: &mut ConnectionManager,
        prefix: &str,
        id: VideoId,
        tags: &[ParsedTag],
    ) -> Result<(), StoreError> {
        ensure_video(conn, prefix, id).await?;
        redis::cmd("SET")
            .arg(tags_key(prefix, id))
            .arg(serde_json::to_string(tags)?)
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }

    async fn load_many(
        conn: &mut ConnectionManager,
        prefix: &str,
        ids: Vec<VideoId>,
    ) -> Result<Vec<ParsedVideo>, StoreError> {
        let mut videos = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(video) = load(conn, prefix, id).await? {
                videos.push(video);
            }
        }
        Ok(videos)
    }

    pub(super) async fn list(
        conn: &mut ConnectionManager,
        prefix: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ParsedVideo>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = rank(offset);
        let stop = start.saturating_add(rank(limit - 1));
        let ids: Vec<VideoId> = redis::cmd("ZREVRANGE")
            .arg(format!("{}:updated", prefix))
            .arg(start)
            .arg(stop)
            .query_async(conn)
            .await?;
        load_many(conn, prefix, ids).await
    }

    async fn video_id_for(
        conn: &mut ConnectionManager,
        prefix: &str,
        site: &str,
        page_url: &str,
    ) -> Result<VideoId, StoreError> {
        let keys = format!("{}:video-keys", prefix);
        let field = format!("{}|{}", site, page_url);

        let existing: Option<VideoId> = redis::cmd("HGET")
            .arg(&keys)
            .arg(&field)
            .query_async(conn)
            .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let candidate: VideoId = redis::cmd("INCR")
            .arg(format!("{}:video-seq", prefix))
            .query_async(conn)
            .await?;
        let inserted: i64 = redis::cmd("HSETNX")
            .arg(&keys)
            .arg(&field)
            .arg(candidate)
            .query_async(conn)
            .await?;
        if inserted == 1 {
            return Ok(candidate);
        }

        // Lost the race to a concurrent insert of the same page
        redis::cmd("HGET")
            .arg(&keys)
            .arg(&field)
            .query_async::<Option<VideoId>>(conn)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("video key vanished: {}", field)))
    }

    pub(super) async fn upsert_video(
        conn: &mut ConnectionManager,
        prefix: &str,
        upsert: VideoUpsert,
    ) -> Result<ParsedVideo, StoreError> {
        let id = video_id_for(conn, prefix, &upsert.site, &upsert.page_url).await?;

        let mut fields = vec![
            field("id", &id)?,
            field("site", &upsert.site)?,
            field("page_url", &upsert.page_url)?,
            field("page_slug_id", &upsert.page_slug_id)?,
            field("media_id", &upsert.media_id)?,
            field("title", &upsert.title)?,
            field("description", &upsert.description)?,
            field("duration_seconds", &upsert.duration_seconds)?,
            field("needs_refresh", &upsert.needs_refresh)?,
            field("last_checked_at", &upsert.checked_at)?,
            field("updated_at", &upsert.checked_at)?,
        ];
        if let Some(category_url) = &upsert.category_url {
            fields.push(field("category_url", category_url)?);
        }

        let key = video_key(prefix, id);
        redis::pipe()
            .atomic()
            .hset_nx(&key, "created_at", serde_json::to_string(&upsert.checked_at)?)
            .ignore()
            .hset_multiple(&key, &fields)
            .ignore()
            .zadd(format!("{}:updated", prefix), id, upsert.checked_at.timestamp_millis())
            .ignore()
            .query_async::<()>(conn)
            .await?;

        load(conn, prefix, id)
            .await?
            .ok_or(StoreError::MissingVideo(id))
    }

    /// Ordering by `last_checked_at` is applied by the caller.
    pub(super) async fn due_direct_sources(
        conn: &mut ConnectionManager,
        prefix: &str,
        boundary: DateTime<Utc>,
    ) -> Result<Vec<ParsedVideoSource>, StoreError> {
        let ids: Vec<VideoId> = redis::cmd("ZRANGEBYSCORE")
            .arg(format!("{}:direct-due", prefix))
            .arg("-inf")
            .arg(boundary.timestamp_millis())
            .query_async(conn)
            .await?;
        Ok(load_many(conn, prefix, ids)
            .await?
            .into_iter()
            .filter_map(|v| v.source(SourceType::DirectVideo).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceStatus;
    use chrono::Duration;

    fn upsert(page: &str, at: DateTime<Utc>) -> VideoUpsert {
        VideoUpsert {
            site: "example".to_string(),
            page_url: page.to_string(),
            category_url: None,
            page_slug_id: None,
            media_id: None,
            title: "Clip".to_string(),
            description: None,
            duration_seconds: Some(61),
            needs_refresh: true,
            checked_at: at,
        }
    }

    fn direct(
        expires_at: Option<DateTime<Utc>>,
        checked_at: DateTime<Utc>,
    ) -> SourceUpsert {
        SourceUpsert {
            source_type: SourceType::DirectVideo,
            url: "https://cdn.example/v.mp4".to_string(),
            status: SourceStatus::Active,
            expires_at,
            last_error: None,
            checked_at,
        }
    }

    #[tokio::test]
    async fn upsert_video_is_unique_per_site_and_page() {
        let registry = SourceRegistry::new_memory();
        let now = Utc::now();

        let first = registry.upsert_video(upsert("https://a.example/1", now)).await.unwrap();
        let mut again = upsert("https://a.example/1", now);
        again.title = "Renamed".to_string();
        let second = registry.upsert_video(again).await.unwrap();
        let other = registry.upsert_video(upsert("https://a.example/2", now)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other.id);
        assert_eq!(second.title, "Renamed");
        assert_eq!(registry.list_videos(10, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upsert_video_keeps_category_when_absent() {
        let registry = SourceRegistry::new_memory();
        let now = Utc::now();

        let mut with_category = upsert("https://a.example/1", now);
        with_category.category_url = Some("https://a.example/cat".to_string());
        registry.upsert_video(with_category).await.unwrap();

        let video = registry.upsert_video(upsert("https://a.example/1", now)).await.unwrap();
        assert_eq!(video.category_url.as_deref(), Some("https://a.example/cat"));
    }

    #[tokio::test]
    async fn upsert_source_replaces_row_of_same_type() {
        let registry = SourceRegistry::new_memory();
        let now = Utc::now();
        let video = registry.upsert_video(upsert("https://a.example/1", now)).await.unwrap();

        registry.upsert_source(video.id, direct(None, now)).await.unwrap();
        let mut replacement = direct(Some(now + Duration::hours(1)), now);
        replacement.url = "https://cdn.example/v2.mp4".to_string();
        registry.upsert_source(video.id, replacement).await.unwrap();

        let stored = registry.find_video(video.id).await.unwrap().unwrap();
        assert_eq!(stored.sources.len(), 1);
        assert_eq!(stored.sources[0].url, "https://cdn.example/v2.mp4");
    }

    #[tokio::test]
    async fn upsert_source_for_unknown_video_fails() {
        let registry = SourceRegistry::new_memory();
        let result = registry.upsert_source(99, direct(None, Utc::now())).await;
        assert!(matches!(result, Err(StoreError::MissingVideo(99))));
    }

    #[tokio::test]
    async fn mark_checked_keeps_previous_refresh_time_on_failure() {
        let registry = SourceRegistry::new_memory();
        let now = Utc::now();
        let video = registry.upsert_video(upsert("https://a.example/1", now)).await.unwrap();

        registry
            .mark_checked(
                video.id,
                RefreshMark { checked_at: now, refreshed_at: Some(now), needs_refresh: false },
            )
            .await
            .unwrap();
        let later = now + Duration::minutes(5);
        registry
            .mark_checked(
                video.id,
                RefreshMark { checked_at: later, refreshed_at: None, needs_refresh: true },
            )
            .await
            .unwrap();

        let stored = registry.find_video(video.id).await.unwrap().unwrap();
        assert_eq!(stored.last_refreshed_at, Some(now));
        assert_eq!(stored.last_checked_at, Some(later));
        assert!(stored.needs_refresh);
    }

    #[tokio::test]
    async fn refresh_candidates_filters_orders_and_limits() {
        let registry = SourceRegistry::new_memory();
        let now = Utc::now();
        let boundary = now + Duration::minutes(15);

        let fresh = registry.upsert_video(upsert("https://a.example/fresh", now)).await.unwrap();
        registry
            .upsert_source(fresh.id, direct(Some(now + Duration::hours(2)), now - Duration::hours(9)))
            .await
            .unwrap();

        let unknown = registry.upsert_video(upsert("https://a.example/unknown", now)).await.unwrap();
        registry
            .upsert_source(unknown.id, direct(None, now - Duration::hours(1)))
            .await
            .unwrap();

        let expiring = registry.upsert_video(upsert("https://a.example/expiring", now)).await.unwrap();
        registry
            .upsert_source(
                expiring.id,
                direct(Some(now + Duration::minutes(5)), now - Duration::hours(3)),
            )
            .await
            .unwrap();

        let expired = registry.upsert_video(upsert("https://a.example/expired", now)).await.unwrap();
        registry
            .upsert_source(
                expired.id,
                direct(Some(now - Duration::minutes(5)), now - Duration::minutes(30)),
            )
            .await
            .unwrap();

        let all = registry.refresh_candidates(boundary, 10).await.unwrap();
        let ids: Vec<VideoId> = all.iter().map(|s| s.video_id).collect();
        assert_eq!(ids, vec![expiring.id, unknown.id, expired.id]);

        let capped = registry.refresh_candidates(boundary, 2).await.unwrap();
        let ids: Vec<VideoId> = capped.iter().map(|s| s.video_id).collect();
        assert_eq!(ids, vec![expiring.id, unknown.id]);
    }

    #[tokio::test]
    async fn list_videos_newest_first_with_offset() {
        let registry = SourceRegistry::new_memory();
        let now = Utc::now();
        let old = registry
            .upsert_video(upsert("https://a.example/old", now - Duration::hours(1)))
            .await
            .unwrap();
        let new = registry.upsert_video(upsert("https://a.example/new", now)).await.unwrap();

        let page = registry.list_videos(1, 0).await.unwrap();
        assert_eq!(page[0].id, new.id);
        let page = registry.list_videos(1, 1).await.unwrap();
        assert_eq!(page[0].id, old.id);
        assert!(registry.list_videos(1, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_tags_swaps_the_whole_set() {
        let registry = SourceRegistry::new_memory();
        let now = Utc::now();
        let video = registry.upsert_video(upsert("https://a.example/1", now)).await.unwrap();

        let beach = crate::model::ParsedTag::new(crate::model::TagType::Tag, "beach", "Beach");
        let sea = crate::model::ParsedTag::new(crate::model::TagType::Tag, "sea", "Sea");
        registry.replace_tags(video.id, vec![beach, sea.clone()]).await.unwrap();
        registry.replace_tags(video.id, vec![sea.clone()]).await.unwrap();

        // Later video upserts leave tags alone
        registry.upsert_video(upsert("https://a.example/1", now)).await.unwrap();
        let stored = registry.find_video(video.id).await.unwrap().unwrap();
        assert_eq!(stored.tags, vec![sea]);

        let missing = registry.replace_tags(99, Vec::new()).await;
        assert!(matches!(missing, Err(StoreError::MissingVideo(99))));
    }

    #[cfg(feature = "valkey")]
    mod valkey_backend {
        use super::*;
        use crate::model::{ParsedTag, TagType};

        /// Registry under a key prefix of its own, or `None` when no server
        /// answers at `VALKEY_URL` (default local port).
        async fn registry(name: &str) -> Option<SourceRegistry> {
            let url = std::env::var("VALKEY_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
            let prefix = format!(
                "playlink-test-{}-{}-{}",
                name,
                std::process::id(),
                Utc::now().timestamp_micros()
            );
            let connect = SourceRegistry::new_valkey_with_prefix(&url, &prefix);
            tokio::time::timeout(std::time::Duration::from_secs(2), connect)
                .await
                .ok()?
                .ok()
        }

        #[tokio::test]
        async fn stores_videos_sources_and_tags() {
            let Some(registry) = registry("roundtrip").await else {
                return;
            };
            let now = Utc::now();

            let mut first = upsert("https://a.example/1", now);
            first.category_url = Some("https://a.example/cat".to_string());
            let video = registry.upsert_video(first).await.unwrap();
            let again = registry.upsert_video(upsert("https://a.example/1", now)).await.unwrap();
            assert_eq!(video.id, again.id);
            assert_eq!(again.category_url.as_deref(), Some("https://a.example/cat"));
            assert_eq!(again.duration_seconds, Some(61));

            registry
                .upsert_source(video.id, direct(Some(now + Duration::minutes(5)), now))
                .await
                .unwrap();
            registry
                .upsert_source(
                    video.id,
                    SourceUpsert::informational(SourceType::Player, "https://a.example/p/1", now),
                )
                .await
                .unwrap();
            registry
                .replace_tags(video.id, vec![ParsedTag::new(TagType::Tag, "beach", "Beach")])
                .await
                .unwrap();

            let stored = registry.find_video(video.id).await.unwrap().unwrap();
            assert_eq!(stored.sources.len(), 2);
            assert_eq!(stored.player_url(), Some("https://a.example/p/1"));
            assert_eq!(stored.tags.len(), 1);
            assert_eq!(stored.created_at, now);

            let due = registry
                .refresh_candidates(now + Duration::minutes(15), 10)
                .await
                .unwrap();
            assert_eq!(due.len(), 1);
            assert_eq!(due[0].video_id, video.id);

            let missing = registry.upsert_source(9_999_999, direct(None, now)).await;
            assert!(matches!(missing, Err(StoreError::MissingVideo(_))));
        }

        #[tokio::test]
        async fn concurrent_ingest_never_drops_a_refreshed_direct_url() {
            let Some(registry) = registry("race").await else {
                return;
            };
            let now = Utc::now();
            let video = registry.upsert_video(upsert("https://a.example/race", now)).await.unwrap();

            for round in 0..25 {
                let url = format!("https://cdn.example/v.mp4?round={round}");
                let refreshed_at = now + Duration::seconds(round);
                let mut source = direct(Some(now + Duration::hours(2)), refreshed_at);
                source.url = url.clone();

                let ingest = registry.upsert_video(upsert("https://a.example/race", now));
                let refresh = async {
                    registry.upsert_source(video.id, source).await?;
                    registry
                        .mark_checked(
                            video.id,
                            RefreshMark {
                                checked_at: refreshed_at,
                                refreshed_at: Some(refreshed_at),
                                needs_refresh: false,
                            },
                        )
                        .await
                };
                let (ingested, refreshed) = tokio::join!(ingest, refresh);
                ingested.unwrap();
                refreshed.unwrap();

                let stored = registry.find_video(video.id).await.unwrap().unwrap();
                assert_eq!(stored.source(SourceType::DirectVideo).unwrap().url, url);
                assert_eq!(stored.last_refreshed_at, Some(refreshed_at));
            }
        }

        #[tokio::test]
        async fn huge_offset_lists_nothing() {
            let Some(registry) = registry("offset").await else {
                return;
            };
            registry.upsert_video(upsert("https://a.example/1", Utc::now())).await.unwrap();

            assert!(registry.list_videos(10, usize::MAX).await.unwrap().is_empty());
            assert_eq!(registry.list_videos(10, 0).await.unwrap().len(), 1);
        }
    }
}
