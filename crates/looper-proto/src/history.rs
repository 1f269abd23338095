//! History store client — CRUD + sort over looped-song records.
//!
//! The store is a remote REST service (base path `/api`).  Saving is an
//! upsert keyed by `(user_id, video_id)`: a repeat save bumps the play count
//! and recency instead of inserting a duplicate row.  Deletes are soft; a
//! deleted record can be restored within the client's undo window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One history row as the store returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub video_id: String,
    pub title: String,
    /// Requested loop duration in minutes.
    pub loop_duration: u32,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub play_count: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_played_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Body for the save/upsert call.
#[derive(Debug, Clone, Serialize)]
pub struct SavePlay {
    pub video_id: String,
    pub title: String,
    pub loop_duration: u32,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct FavoriteUpdate {
    is_favorite: bool,
}

/// List orderings the store supports.  `Added` is the server default and
/// sends no query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    #[default]
    Recent,
    Plays,
    Added,
}

impl SortMode {
    /// Value for the `sort` query parameter; `None` for the default order.
    pub fn query(self) -> Option<&'static str> {
        match self {
            SortMode::Recent => Some("recent"),
            SortMode::Plays => Some("plays"),
            SortMode::Added => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortMode::Recent => "recent",
            SortMode::Plays => "plays",
            SortMode::Added => "added",
        }
    }

    pub fn next(self) -> Self {
        match self {
            SortMode::Recent => SortMode::Plays,
            SortMode::Plays => SortMode::Added,
            SortMode::Added => SortMode::Recent,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("history service returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// Thin reqwest wrapper around the store endpoints.  Cheap to clone; every
/// call carries the configured `user_id`.
#[derive(Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
}

impl HistoryClient {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("looper/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        }
    }

    /// Save a play (create or bump).  Used both for the initial submit and
    /// for replays from the history panel.
    pub async fn save(&self, play: &SavePlay) -> Result<HistoryRecord, HistoryError> {
        let url = format!("{}/saveloopedsong", self.base_url);
        debug!("[history] save video_id={}", play.video_id);
        let resp = self.http.post(&url).json(play).send().await?;
        Self::decode(resp).await
    }

    /// Fetch the full list under `sort`.  The caller replaces its cache
    /// wholesale with the result.
    pub async fn list(&self, sort: SortMode) -> Result<Vec<HistoryRecord>, HistoryError> {
        let url = format!("{}/looped-songs", self.base_url);
        let mut req = self.http.get(&url);
        if let Some(q) = sort.query() {
            req = req.query(&[("sort", q)]);
        }
        debug!("[history] list sort={}", sort.label());
        let resp = req.send().await?;
        Self::decode(resp).await
    }

    /// Set the favorite flag to an explicit desired state (not a toggle
    /// instruction), so repeated identical calls are idempotent.
    pub async fn set_favorite(
        &self,
        video_id: &str,
        is_favorite: bool,
    ) -> Result<HistoryRecord, HistoryError> {
        let url = format!("{}/looped-songs/{}/favorite", self.base_url, video_id);
        debug!("[history] favorite video_id={} -> {}", video_id, is_favorite);
        let resp = self
            .http
            .patch(&url)
            .query(&[("user_id", self.user_id.as_str())])
            .json(&FavoriteUpdate { is_favorite })
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// Soft-delete a record.
    pub async fn delete(&self, video_id: &str) -> Result<(), HistoryError> {
        let url = format!("{}/looped-songs/{}", self.base_url, video_id);
        debug!("[history] delete video_id={}", video_id);
        let resp = self
            .http
            .delete(&url)
            .query(&[("user_id", self.user_id.as_str())])
            .send()
            .await?;
        Self::check(resp).await
    }

    /// Restore a soft-deleted record.
    pub async fn restore(&self, video_id: &str) -> Result<HistoryRecord, HistoryError> {
        let url = format!("{}/looped-songs/{}/restore", self.base_url, video_id);
        debug!("[history] restore video_id={}", video_id);
        let resp = self
            .http
            .patch(&url)
            .query(&[("user_id", self.user_id.as_str())])
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, HistoryError> {
        let resp = Self::error_for_status(resp).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn check(resp: reqwest::Response) -> Result<(), HistoryError> {
        Self::error_for_status(resp).await.map(|_| ())
    }

    async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, HistoryError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(HistoryError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_query_params() {
        assert_eq!(SortMode::Recent.query(), Some("recent"));
        assert_eq!(SortMode::Plays.query(), Some("plays"));
        assert_eq!(SortMode::Added.query(), None);
    }

    #[test]
    fn test_sort_cycle_covers_all_modes() {
        let start = SortMode::Recent;
        assert_eq!(start.next(), SortMode::Plays);
        assert_eq!(start.next().next(), SortMode::Added);
        assert_eq!(start.next().next().next(), start);
    }

    #[test]
    fn test_record_deserializes_with_missing_optionals() {
        let json = r#"{
            "id": "row1",
            "video_id": "dQw4w9WgXcQ",
            "title": "Track",
            "loop_duration": 3
        }"#;
        let rec: HistoryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.video_id, "dQw4w9WgXcQ");
        assert_eq!(rec.play_count, 0);
        assert!(!rec.is_favorite);
        assert!(rec.created_at.is_none());
    }

    #[test]
    fn test_client_strips_trailing_slash() {
        let client = HistoryClient::new("http://localhost:8000/api/", "");
        assert_eq!(client.base_url, "http://localhost:8000/api");
    }
}
