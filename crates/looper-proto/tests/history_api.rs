//! HistoryClient round-trips against an in-process mock of the store.
//!
//! The mock mirrors the service contract: save is an upsert keyed by
//! (user_id, video_id) that bumps play_count, list orders favorites first
//! then by the requested sort, delete is soft, restore brings a row back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use chrono::Utc;

use looper_proto::history::{HistoryClient, HistoryError, HistoryRecord, SavePlay, SortMode};

#[derive(Clone, Default)]
struct MockStore {
    rows: Arc<Mutex<Vec<HistoryRecord>>>,
}

#[derive(serde::Deserialize)]
struct SaveBody {
    video_id: String,
    title: String,
    loop_duration: u32,
    user_id: String,
}

#[derive(serde::Deserialize)]
struct FavoriteBody {
    is_favorite: bool,
}

async fn save_song(
    State(store): State<MockStore>,
    Json(body): Json<SaveBody>,
) -> Json<HistoryRecord> {
    let mut rows = store.rows.lock().unwrap();
    if let Some(row) = rows.iter_mut().find(|r| r.video_id == body.video_id) {
        row.play_count += 1;
        row.last_played_at = Some(Utc::now());
        if !body.title.is_empty() {
            row.title = body.title;
        }
        row.loop_duration = body.loop_duration;
        return Json(row.clone());
    }
    let row = HistoryRecord {
        id: format!("row-{}", rows.len() + 1),
        video_id: body.video_id,
        title: body.title,
        loop_duration: body.loop_duration,
        user_id: Some(body.user_id),
        play_count: 1,
        created_at: Some(Utc::now()),
        last_played_at: Some(Utc::now()),
        is_favorite: false,
        is_deleted: false,
    };
    rows.push(row.clone());
    Json(row)
}

async fn list_songs(
    State(store): State<MockStore>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Vec<HistoryRecord>> {
    let rows = store.rows.lock().unwrap();
    let mut visible: Vec<HistoryRecord> = rows.iter().filter(|r| !r.is_deleted).cloned().collect();
    match params.get("sort").map(String::as_str) {
        Some("recent") => visible.sort_by(|a, b| {
            (b.is_favorite, b.last_played_at).cmp(&(a.is_favorite, a.last_played_at))
        }),
        Some("plays") => visible
            .sort_by(|a, b| (b.is_favorite, b.play_count).cmp(&(a.is_favorite, a.play_count))),
        _ => visible
            .sort_by(|a, b| (b.is_favorite, b.created_at).cmp(&(a.is_favorite, a.created_at))),
    }
    Json(visible)
}

async fn set_favorite(
    State(store): State<MockStore>,
    Path(video_id): Path<String>,
    Json(body): Json<FavoriteBody>,
) -> Result<Json<HistoryRecord>, StatusCode> {
    let mut rows = store.rows.lock().unwrap();
    let row = rows
        .iter_mut()
        .find(|r| r.video_id == video_id && !r.is_deleted)
        .ok_or(StatusCode::NOT_FOUND)?;
    row.is_favorite = body.is_favorite;
    Ok(Json(row.clone()))
}

async fn delete_song(
    State(store): State<MockStore>,
    Path(video_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let mut rows = store.rows.lock().unwrap();
    let row = rows
        .iter_mut()
        .find(|r| r.video_id == video_id && !r.is_deleted)
        .ok_or(StatusCode::NOT_FOUND)?;
    row.is_deleted = true;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_song(
    State(store): State<MockStore>,
    Path(video_id): Path<String>,
) -> Result<Json<HistoryRecord>, StatusCode> {
    let mut rows = store.rows.lock().unwrap();
    let row = rows
        .iter_mut()
        .find(|r| r.video_id == video_id && r.is_deleted)
        .ok_or(StatusCode::NOT_FOUND)?;
    row.is_deleted = false;
    Ok(Json(row.clone()))
}

/// Spin up the mock on an ephemeral port and return a client bound to it.
async fn start_mock() -> HistoryClient {
    let store = MockStore::default();
    let app = Router::new()
        .route("/api/saveloopedsong", post(save_song))
        .route("/api/looped-songs", get(list_songs))
        .route("/api/looped-songs/:video_id/favorite", patch(set_favorite))
        .route("/api/looped-songs/:video_id", delete(delete_song))
        .route("/api/looped-songs/:video_id/restore", patch(restore_song))
        .with_state(store);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("mock local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    HistoryClient::new(format!("http://{}/api", addr), "")
}

fn play(video_id: &str, title: &str, minutes: u32) -> SavePlay {
    SavePlay {
        video_id: video_id.to_string(),
        title: title.to_string(),
        loop_duration: minutes,
        user_id: String::new(),
    }
}

#[tokio::test]
async fn test_save_is_an_upsert_that_bumps_play_count() {
    let client = start_mock().await;

    let first = client.save(&play("vid12345678", "Track", 3)).await.unwrap();
    assert_eq!(first.play_count, 1);

    let second = client.save(&play("vid12345678", "Track", 3)).await.unwrap();
    assert_eq!(second.play_count, 2);
    assert_eq!(second.id, first.id);

    let rows = client.list(SortMode::Added).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_list_orders_by_play_count() {
    let client = start_mock().await;
    client.save(&play("aaaaaaaaaaa", "A", 1)).await.unwrap();
    client.save(&play("bbbbbbbbbbb", "B", 1)).await.unwrap();
    client.save(&play("bbbbbbbbbbb", "B", 1)).await.unwrap();

    let rows = client.list(SortMode::Plays).await.unwrap();
    assert_eq!(rows[0].video_id, "bbbbbbbbbbb");
    assert_eq!(rows[0].play_count, 2);
}

#[tokio::test]
async fn test_favorite_is_idempotent_desired_state() {
    let client = start_mock().await;
    client.save(&play("ccccccccccc", "C", 1)).await.unwrap();

    let once = client.set_favorite("ccccccccccc", true).await.unwrap();
    let twice = client.set_favorite("ccccccccccc", true).await.unwrap();
    assert!(once.is_favorite);
    assert!(twice.is_favorite);

    // Favorites float to the top regardless of sort.
    client.save(&play("ddddddddddd", "D", 1)).await.unwrap();
    client.save(&play("ddddddddddd", "D", 1)).await.unwrap();
    let rows = client.list(SortMode::Plays).await.unwrap();
    assert_eq!(rows[0].video_id, "ccccccccccc");
}

#[tokio::test]
async fn test_delete_then_restore_round_trip() {
    let client = start_mock().await;
    client.save(&play("eeeeeeeeeee", "E", 2)).await.unwrap();
    client.save(&play("eeeeeeeeeee", "E", 2)).await.unwrap();

    client.delete("eeeeeeeeeee").await.unwrap();
    let rows = client.list(SortMode::Added).await.unwrap();
    assert!(rows.iter().all(|r| r.video_id != "eeeeeeeeeee"));

    let restored = client.restore("eeeeeeeeeee").await.unwrap();
    assert_eq!(restored.play_count, 2, "restore must preserve play_count");

    let rows = client.list(SortMode::Added).await.unwrap();
    assert!(rows.iter().any(|r| r.video_id == "eeeeeeeeeee"));
}

#[tokio::test]
async fn test_missing_record_surfaces_api_error() {
    let client = start_mock().await;
    let err = client.delete("nosuchvideo").await.unwrap_err();
    match err {
        HistoryError::Api { status, .. } => assert_eq!(status, 404),
        other => panic!("expected Api error, got {other:?}"),
    }
}
