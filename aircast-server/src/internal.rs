//! Internal endpoints for mixer callbacks.
//!
//! These are called by the mixer for livestream authentication, session
//! tracking, and metadata reports. Production deployments additionally
//! fence this prefix at the reverse proxy; the internal principal is
//! still required here.

use axum::{routing::post, Json};

use aircast_core::{DisconnectReason, SourceMetadata};

use crate::{
    auth::InternalPrincipal,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    schemas::{
        LivestreamAuthSchema, LivestreamConnectSchema, LivestreamDisconnectSchema,
        MetadataSchema, ValidatedJson,
    },
    serialized::{LivestreamAuthResult, Success, ToSerialized},
    Router,
};

#[utoipa::path(
    post,
    path = "/api/internal/livestream/auth",
    tag = "internal",
    request_body = LivestreamAuthSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = LivestreamAuthResult)
    )
)]
async fn livestream_auth(
    _internal: InternalPrincipal,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<LivestreamAuthSchema>,
) -> ServerResult<Json<LivestreamAuthResult>> {
    let decision = context
        .station
        .livestream
        .authenticate(&body.user, &body.password)
        .await?;

    Ok(Json(decision.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/internal/livestream/connect",
    tag = "internal",
    request_body = LivestreamConnectSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success)
    )
)]
async fn livestream_connect(
    _internal: InternalPrincipal,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<LivestreamConnectSchema>,
) -> ServerResult<Json<Success>> {
    context.station.livestream.connect(&body.session_id).await?;
    Ok(Json(Success::new()))
}

#[utoipa::path(
    post,
    path = "/api/internal/livestream/disconnect",
    tag = "internal",
    request_body = LivestreamDisconnectSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success)
    )
)]
async fn livestream_disconnect(
    _internal: InternalPrincipal,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<LivestreamDisconnectSchema>,
) -> ServerResult<Json<Success>> {
    let reason = match body.reason.as_deref() {
        None | Some("client") => DisconnectReason::Client,
        Some("limit") => DisconnectReason::Limit,
        Some("admin") => DisconnectReason::Admin,
        Some(other) => {
            return Err(ServerError::BadInput(format!(
                "Unknown disconnect reason: {other}"
            )))
        }
    };

    context
        .station
        .livestream
        .disconnect(&body.session_id, reason)
        .await?;

    Ok(Json(Success::new()))
}

#[utoipa::path(
    post,
    path = "/api/internal/livestream/metadata",
    tag = "internal",
    request_body = MetadataSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success)
    )
)]
async fn livestream_metadata(
    _internal: InternalPrincipal,
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
        .route("/livestream/auth", post(livestream_auth))
        .route("/livestream/connect", post(livestream_connect))
        .route("/livestream/disconnect", post(livestream_disconnect))
        .route("/livestream/metadata", post(livestream_metadata))
}
