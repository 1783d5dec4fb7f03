use axum::{
    extract::{Multipart, Path, Query},
    routing::{get, post},
    Json,
};
use serde::Deserialize;

use aircast_station::{AddSong, UploadedFile, PUBLIC_LIST_LIMIT};

use crate::{
    auth::UserPrincipal,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    serialized::{SongAdded, SongItem, Success, ToSerialized},
    Router,
};

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

/// Reads the multipart form of an add request: one of `url` or `file`,
/// plus optional `song_name` and `artist` fields.
pub async fn read_add_song(mut multipart: Multipart) -> ServerResult<AddSong> {
    let mut request = AddSong::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadInput(e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "url" => {
                request.url = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ServerError::BadInput(e.to_string()))?,
                )
            }
            "song_name" => {
                request.song_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ServerError::BadInput(e.to_string()))?,
                )
            }
            "artist" => {
                request.artist = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ServerError::BadInput(e.to_string()))?,
                )
            }
            "file" => {
                let name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadInput(e.to_string()))?;

                request.file = Some(UploadedFile {
                    name,
                    bytes: bytes.to_vec(),
                });
            }
            other => {
                return Err(ServerError::BadInput(format!(
                    "Unexpected form field: {other}"
                )))
            }
        }
    }

    Ok(request)
}

#[utoipa::path(
    get,
    path = "/api/queue/list",
    tag = "queue",
    params(
        ("limit" = Option<usize>, Query, description = "Maximum number of songs to return (1-20)")
    ),
    responses(
        (status = 200, body = Vec<SongItem>)
    )
)]
async fn list_songs(
    context: ServerContext,
    Query(params): Query<ListParams>,
) -> ServerResult<Json<Vec<SongItem>>> {
    let limit = params.limit.unwrap_or(PUBLIC_LIST_LIMIT);

    if limit == 0 || limit > PUBLIC_LIST_LIMIT {
        return Err(ServerError::BadInput(format!(
            "limit must be between 1 and {PUBLIC_LIST_LIMIT}"
        )));
    }

    let songs = context.station.queues.next_songs(limit).await?;

    Ok(Json(songs.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/queue/add",
    tag = "queue",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = SongAdded),
        (status = 403, description = "Queue or add request limit exceeded")
    )
)]
async fn add_song(
    UserPrincipal(claims): UserPrincipal,
    context: ServerContext,
    multipart: Multipart,
) -> ServerResult<Json<SongAdded>> {
    let request = read_add_song(multipart).await?;
    let song_id = context.station.queues.add_for_user(&claims, request).await?;

    Ok(Json(SongAdded { song_id }))
}

#[utoipa::path(
    delete,
    path = "/api/queue/{song_id}",
    tag = "queue",
    security(
        ("BearerAuth" = [])
    ),
    params(
        ("song_id" = String, Path, description = "Prefixed song id, user queue only")
    ),
    responses(
        (status = 200, body = Success),
        (status = 404, description = "Song not found")
    )
)]
async fn delete_song(
    UserPrincipal(claims): UserPrincipal,
    context: ServerContext,
    Path(song_id): Path<String>,
) -> ServerResult<Json<Success>> {
    context
        .station
        .queues
        .delete_for_user(&claims, &song_id)
        .await?;

    Ok(Json(Success::new()))
}

pub fn router() -> Router {
    Router::new()
        .route("/list", get(list_songs))
        .route("/add", post(add_song))
        .route("/:song_id", axum::routing::delete(delete_song))
}
