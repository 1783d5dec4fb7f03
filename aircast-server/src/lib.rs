use axum::{routing::get, Router as AxumRouter};
use context::ServerContext;
use std::{
    env,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use aircast_station::LiveStation;

mod admin;
mod auth;
mod context;
mod docs;
mod errors;
mod internal;
mod metadata;
mod queue;
mod recordings;
mod schemas;
mod serialized;
mod streaming;
mod webhooks;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;

type Router = AxumRouter<ServerContext>;

/// Starts the aircast control API.
pub async fn run_server(station: Arc<LiveStation>) {
    let context = ServerContext { station };

    let port = env::var("AIRCAST_SERVER_PORT")
        .map(|x| x.parse::<u16>().expect("Port must be a number"))
        .unwrap_or(DEFAULT_PORT);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .nest("/queue", queue::router())
        .nest("/recordings", recordings::router())
        .nest("/admin", admin::router())
        .nest("/admin/webhooks", webhooks::router())
        .nest("/admin/recordings", recordings::admin_router())
        .nest("/internal", internal::router())
        .merge(metadata::router());

    let root_router = Router::new()
        .nest("/api", api_router)
        .route("/api.json", get(docs::docs))
        .with_state(context)
        .layer(cors);

    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    axum::serve(listener, root_router.into_make_service())
        .await
        .unwrap();
}
