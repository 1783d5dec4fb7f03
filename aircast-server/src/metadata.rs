use axum::{routing::get, Json};

use crate::{
    context::ServerContext,
    errors::ServerResult,
    serialized::{NowPlayingItem, ToSerialized},
    Router,
};

#[utoipa::path(
    get,
    path = "/api/metadata/now",
    tag = "metadata",
    responses(
        (status = 200, body = NowPlayingItem)
    )
)]
async fn now_playing(context: ServerContext) -> ServerResult<Json<NowPlayingItem>> {
    let playing =
        aircast_station::now_playing(context.station.context().store.as_ref()).await?;

    Ok(Json(playing.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "metadata",
    responses(
        (status = 200, description = "The control plane is up")
    )
)]
async fn health() -> &'static str {
    "ok"
}

pub fn router() -> Router {
    Router::new()
        .route("/metadata/now", get(now_playing))
        .route("/health", get(health))
}
