use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query},
    routing::{delete, get},
    Json,
};
use chrono::DateTime;
use serde::Deserialize;

use aircast_station::db::RecordingFilter;

use crate::{
    auth::AdminPrincipal,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    serialized::{RecordingItem, RecordingsList, ShowRecordings, Success, ToSerialized},
    streaming,
    Router,
};

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
struct ListParams {
    show_name: Option<String>,
    search: Option<String>,
    genre: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
}

fn parse_date(raw: &str, name: &str) -> ServerResult<chrono::DateTime<chrono::Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.to_utc())
        .map_err(|_| ServerError::BadInput(format!("Invalid {name} format. Use ISO format.")))
}

#[utoipa::path(
    get,
    path = "/api/recordings/list",
    tag = "recordings",
    params(
        ("show_name" = Option<String>, Query, description = "Filter by show name (exact match)"),
        ("search" = Option<String>, Query, description = "Search in title, artist, genre, description"),
        ("genre" = Option<String>, Query, description = "Filter by genre (exact match)"),
        ("date_from" = Option<String>, Query, description = "Filter by date from (ISO format)"),
        ("date_to" = Option<String>, Query, description = "Filter by date to (ISO format)"),
        ("page" = Option<i64>, Query, description = "Page number (1-based)"),
        ("page_size" = Option<i64>, Query, description = "Page size (max 100)")
    ),
    responses(
        (status = 200, body = RecordingsList)
    )
)]
async fn list_recordings(
    context: ServerContext,
    Query(params): Query<ListParams>,
) -> ServerResult<Json<RecordingsList>> {
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(20);

    if page < 1 {
        return Err(ServerError::BadInput("page must be at least 1".to_string()));
    }

    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ServerError::BadInput(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let date_from = params
        .date_from
        .as_deref()
        .map(|raw| parse_date(raw, "date_from"))
        .transpose()?;
    let date_to = params
        .date_to
        .as_deref()
        .map(|raw| parse_date(raw, "date_to"))
        .transpose()?;

    let (entries, total_recordings) = context
        .station
        .recordings
        .list(RecordingFilter {
            show_name: params.show_name,
            search: params.search,
            genre: params.genre,
            date_from,
            date_to,
            offset: (page - 1) * page_size,
            limit: page_size,
        })
        .await?;

    // Grouped by show, alphabetically
    let mut shows: BTreeMap<String, Vec<RecordingItem>> = BTreeMap::new();

    for entry in &entries {
        let show_name = entry
            .show_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        shows
            .entry(show_name)
            .or_default()
            .push(entry.to_serialized());
    }

    let total_shows = shows.len();
    let shows = shows
        .into_iter()
        .map(|(show_name, recordings)| ShowRecordings {
            show_name,
            recordings,
        })
        .collect();

    Ok(Json(RecordingsList {
        shows,
        total_shows,
        total_recordings,
        page,
        page_size,
    }))
}

#[utoipa::path(
    delete,
    path = "/api/admin/recordings/{recording_id}",
    tag = "admin",
    params(
        ("recording_id" = String, Path, description = "Recording id")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success),
        (status = 404, description = "Recording not found")
    )
)]
async fn delete_recording(
    _admin: AdminPrincipal,
    context: ServerContext,
    Path(recording_id): Path<String>,
) -> ServerResult<Json<Success>> {
    context.station.recordings.delete(&recording_id).await?;
    Ok(Json(Success::new()))
}

pub fn router() -> Router {
    Router::new()
        .route("/list", get(list_recordings))
        .route("/stream/:recording_id", get(streaming::stream_recording))
}

pub fn admin_router() -> Router {
    Router::new().route("/:recording_id", delete(delete_recording))
}
