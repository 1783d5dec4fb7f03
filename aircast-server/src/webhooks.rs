use axum::{
    extract::Path,
    routing::{delete, get, post},
    Json,
};

use aircast_station::NewSubscription;

use crate::{
    auth::AdminPrincipal,
    context::ServerContext,
    errors::ServerResult,
    schemas::{ValidatedJson, WebhookSubscribeSchema},
    serialized::{
        Success, ToSerialized, Webhook, WebhookDelivery, WebhookStats, WebhookTestResult,
    },
    Router,
};

#[utoipa::path(
    post,
    path = "/api/admin/webhooks/subscribe",
    tag = "webhooks",
    request_body = WebhookSubscribeSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Webhook)
    )
)]
async fn subscribe(
    _admin: AdminPrincipal,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<WebhookSubscribeSchema>,
) -> ServerResult<Json<Webhook>> {
    let webhook = context
        .station
        .webhooks
        .subscribe(NewSubscription {
            url: body.url,
            events: body.events,
            signing_key: body.signing_key,
            description: body.description,
        })
        .await?;

    Ok(Json(webhook.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/admin/webhooks/list",
    tag = "webhooks",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Webhook>, description = "Signing keys are never included")
    )
)]
async fn list(
    _admin: AdminPrincipal,
    context: ServerContext,
) -> ServerResult<Json<Vec<Webhook>>> {
    let webhooks = context.station.webhooks.list().await?;
    Ok(Json(webhooks.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/api/admin/webhooks/{webhook_id}",
    tag = "webhooks",
    params(
        ("webhook_id" = String, Path, description = "Webhook id")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Success),
        (status = 404, description = "Webhook not found")
    )
)]
async fn unsubscribe(
    _admin: AdminPrincipal,
    context: ServerContext,
    Path(webhook_id): Path<String>,
) -> ServerResult<Json<Success>> {
    context.station.webhooks.delete(&webhook_id).await?;
    Ok(Json(Success::new()))
}

#[utoipa::path(
    get,
    path = "/api/admin/webhooks/{webhook_id}/deliveries",
    tag = "webhooks",
    params(
        ("webhook_id" = String, Path, description = "Webhook id")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<WebhookDelivery>)
    )
)]
async fn deliveries(
    _admin: AdminPrincipal,
    context: ServerContext,
    Path(webhook_id): Path<String>,
) -> ServerResult<Json<Vec<WebhookDelivery>>> {
    let deliveries = context.station.webhooks.deliveries(&webhook_id).await?;
    Ok(Json(deliveries.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/admin/webhooks/{webhook_id}/stats",
    tag = "webhooks",
    params(
        ("webhook_id" = String, Path, description = "Webhook id")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = WebhookStats)
    )
)]
async fn stats(
    _admin: AdminPrincipal,
    context: ServerContext,
    Path(webhook_id): Path<String>,
) -> ServerResult<Json<WebhookStats>> {
    let stats = context.station.webhooks.stats(&webhook_id).await?;
    Ok(Json(stats.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/admin/webhooks/{webhook_id}/test",
    tag = "webhooks",
    params(
        ("webhook_id" = String, Path, description = "Webhook id")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = WebhookTestResult, description = "Outcome of the synchronous test delivery")
    )
)]
async fn test(
    _admin: AdminPrincipal,
    context: ServerContext,
    Path(webhook_id): Path<String>,
) -> ServerResult<Json<WebhookTestResult>> {
    let outcome = context.station.webhooks.test(&webhook_id).await?;
    Ok(Json(outcome.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/list", get(list))
        .route("/:webhook_id", delete(unsubscribe))
        .route("/:webhook_id/deliveries", get(deliveries))
        .route("/:webhook_id/stats", get(stats))
        .route("/:webhook_id/test", post(test))
}
