use axum::{
    extract::{Multipart, Path, Query},
    routing::{delete, post},
    Json,
};
use serde::Deserialize;

use aircast_core::{QueueKind, SourceMetadata};
use aircast_station::PlaybackAction;

use crate::{
    auth::AdminPrincipal,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    queue::read_add_song,
    schemas::{LivestreamTokenSchema, MetadataSchema, TokenCreateSchema, ValidatedJson},
    serialized::{
        LivestreamTokenCreated, SongAdded, SongItem, Success, ToSerialized, TokenCreated,
    },
    Router,
};

#[derive(Debug, Deserialize)]
struct PlaylistParams {
    playlist: Option<String>,
}

impl PlaylistParams {
    fn queue(&self) -> ServerResult<QueueKind> {
        match self.playlist.as_deref() {
            None | Some("user") => Ok(QueueKind::User),
            Some("fallback") => Ok(QueueKind::Fallback),
            Some(other) => Err(ServerError::BadInput(format!("Unknown playlist: {other}"))),
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/admin/token",
    tag = "admin",
    request_body = TokenCreateSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = TokenCreated)
    )
)]
async fn create_token(
    _admin: AdminPrincipal,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<TokenCreateSchema>,
) -> ServerResult<Json<TokenCreated>> {
    let (token, expires_at) = context.station.auth.issue_user_token(
        body.duration_seconds,
        body.max_queue_songs,
        body.max_add_requests,
    )?;

    Ok(Json(TokenCreated {
        token,
        expires_at: expires_at.to_rfc3339(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/admin/livestream/token",
    tag = "admin",
    request_body = LivestreamTokenSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = LivestreamTokenCreated)
    )
)]
async fn create_livestream_token(
    _admin: AdminPrincipal,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<LivestreamTokenSchema>,
) -> ServerResult<Json<LivestreamTokenCreated>> {
    let (token, expires_at) = context.station.auth.issue_livestream_token(
        body.max_streaming_seconds,
        body.show_name,
        body.min_recording_duration.unwrap_or(60),
    )?;

    Ok(Json(LivestreamTokenCreated {
        token,
        expires_at: expires_at.to_rfc3339(),
        max_streaming_seconds: body.max_streaming_seconds,
    }))
}

#[utoipa::path(
    post,
    path = "/api/admin/queue/add",
    tag = "admin",
    params(
        ("playlist" = Option<String>, Query, description = "Target playlist (user or fallback)")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = SongAdded)
    )
)]
async fn add_song(
    _admin: AdminPrincipal,
    context: ServerContext,
    Query(params): Query<PlaylistParams>,
    multipart: Multipart,
) -> ServerResult<Json<SongAdded>> {
    let request = read_add_song(multipart).await?;
    let song_id = context
        .station
        .queues
        .add_admin(params.queue()?, request)
        .await?;

    Ok(Json(SongAdded { song_id }))
}

#[utoipa::path(
    get,
    path = "/api/admin/queue/list",
    tag = "admin",
    params(
        ("playlist" = Option<String>, Query, description = "Target playlist (user or fallback)")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<SongItem>)
    )
)]
async fn list_songs(
    _admin: AdminPrincipal,
    context: ServerContext,
    Query(params): Query<PlaylistParams>,
) -> ServerResult<Json<Vec<SongItem>>> {
    let songs = context.station.queues.list(params.queue()?).await?;
    Ok(Json(songs.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/api/admin/queue/{song_id}",
    tag = "admin",
    params(
        ("song_id" = String, Path, description = "Prefixed song id"),
        ("playlist" = Option<String>, Query, description = "Target playlist (user or fallback)")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success)
    )
)]
async fn delete_song(
    _admin: AdminPrincipal,
    context: ServerContext,
    Path(song_id): Path<String>,
    Query(params): Query<PlaylistParams>,
) -> ServerResult<Json<Success>> {
    context
        .station
        .queues
        .delete_admin(params.queue()?, &song_id)
        .await?;

    Ok(Json(Success::new()))
}

#[utoipa::path(
    post,
    path = "/api/admin/queue/clear",
    tag = "admin",
    params(
        ("playlist" = Option<String>, Query, description = "Target playlist (user or fallback)")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success)
    )
)]
async fn clear_queue(
    _admin: AdminPrincipal,
    context: ServerContext,
    Query(params): Query<PlaylistParams>,
) -> ServerResult<Json<Success>> {
    context.station.queues.clear(params.queue()?).await?;
    Ok(Json(Success::new()))
}

async fn control_playback(
    context: ServerContext,
    params: PlaylistParams,
    action: PlaybackAction,
) -> ServerResult<Json<Success>> {
    context
        .station
        .queues
        .control(params.queue()?, action)
        .await?;

    Ok(Json(Success::new()))
}

#[utoipa::path(
    post,
    path = "/api/admin/playback/play",
    tag = "admin",
    params(
        ("playlist" = Option<String>, Query, description = "Target playlist (user or fallback)")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success)
    )
)]
async fn play(
    _admin: AdminPrincipal,
    context: ServerContext,
    Query(params): Query<PlaylistParams>,
) -> ServerResult<Json<Success>> {
    control_playback(context, params, PlaybackAction::Play).await
}

#[utoipa::path(
    post,
    path = "/api/admin/playback/pause",
    tag = "admin",
    params(
        ("playlist" = Option<String>, Query, description = "Target playlist (user or fallback)")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success)
    )
)]
async fn pause(
    _admin: AdminPrincipal,
    context: ServerContext,
    Query(params): Query<PlaylistParams>,
) -> ServerResult<Json<Success>> {
    control_playback(context, params, PlaybackAction::Pause).await
}

#[utoipa::path(
    post,
    path = "/api/admin/playback/resume",
    tag = "admin",
    params(
        ("playlist" = Option<String>, Query, description = "Target playlist (user or fallback)")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success)
    )
)]
async fn resume(
    _admin: AdminPrincipal,
    context: ServerContext,
    Query(params): Query<PlaylistParams>,
) -> ServerResult<Json<Success>> {
    control_playback(context, params, PlaybackAction::Resume).await
}

#[utoipa::path(
    post,
    path = "/api/admin/metadata",
    tag = "admin",
    request_body = MetadataSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success)
    )
)]
async fn set_livestream_metadata(
    _admin: AdminPrincipal,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<MetadataSchema>,
) -> ServerResult<Json<Success>> {
    context
        .station
        .livestream
        .update_metadata(SourceMetadata {
            title: body.title,
            artist: body.artist,
            genre: body.genre,
            description: body.description,
        })
        .await?;

    Ok(Json(Success::new()))
}

pub fn router() -> Router {
    Router::new()
        .route("/token", post(create_token))
        .route("/livestream/token", post(create_livestream_token))
        .route("/queue/add", post(add_song))
        .route("/queue/list", axum::routing::get(list_songs))
        .route("/queue/:song_id", delete(delete_song))
        .route("/queue/clear", post(clear_queue))
        .route("/playback/play", post(play))
        .route("/playback/pause", post(pause))
        .route("/playback/resume", post(resume))
        .route("/metadata", post(set_livestream_metadata))
}
