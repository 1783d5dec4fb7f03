mod auth;
mod input;
mod livestream;
mod observer;
mod queues;
mod recording;
mod webhooks;

pub mod db;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

pub use auth::*;
pub use input::*;
pub use livestream::*;
pub use observer::*;
pub use queues::*;
pub use recording::*;
pub use webhooks::*;

use aircast_core::{
    channels::{LiveControl, QueueChannel},
    store::StateStore,
    Config, EventBus,
};
use db::Database;

/// The aircast control plane, arbitrating what is on air, under what
/// authority, and with what downstream side effects.
pub struct Station<S, Db> {
    pub auth: Arc<Auth>,
    pub queues: QueueManager<S, Db>,
    pub livestream: LivestreamArbiter<S, Db>,
    pub webhooks: WebhookManager<S, Db>,
    pub recordings: RecordingLibrary<S, Db>,

    context: StationContext<S, Db>,
}

/// A type passed to the station's components, to access shared state, emit
/// events, and address the mixer.
pub struct StationContext<S, Db> {
    pub config: Config,
    pub store: Arc<S>,
    pub database: Arc<Db>,
    pub events: EventBus<S>,
    pub auth: Arc<Auth>,
    pub media: Arc<dyn MediaTools>,

    pub user_queue: Arc<dyn QueueChannel>,
    pub fallback_queue: Arc<dyn QueueChannel>,
    pub live_control: Arc<dyn LiveControl>,
}

impl<S, Db> Station<S, Db>
where
    S: StateStore,
    Db: Database,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: S,
        database: Db,
        user_queue: Arc<dyn QueueChannel>,
        fallback_queue: Arc<dyn QueueChannel>,
        live_control: Arc<dyn LiveControl>,
        media: Arc<dyn MediaTools>,
    ) -> Self {
        let store = Arc::new(store);
        let auth = Arc::new(Auth::new(
            config.admin_api_tokens.clone(),
            config.internal_api_token.clone(),
            &config.jwt_secret,
        ));

        let context = StationContext {
            config,
            store: store.clone(),
            database: Arc::new(database),
            events: EventBus::new(store),
            auth: auth.clone(),
            media,
            user_queue,
            fallback_queue,
            live_control,
        };

        Self {
            auth,
            queues: QueueManager::new(&context),
            livestream: LivestreamArbiter::new(&context),
            webhooks: WebhookManager::new(&context),
            recordings: RecordingLibrary::new(&context),
            context,
        }
    }

    pub fn context(&self) -> &StationContext<S, Db> {
        &self.context
    }

    /// The source observer loop, to be spawned as a background task.
    pub fn observer(&self) -> SourceObserver<S, Db> {
        SourceObserver::new(&self.context)
    }

    /// The webhook dispatcher loop, to be spawned as a background task.
    pub fn dispatcher(&self) -> WebhookDispatcher<S, Db> {
        WebhookDispatcher::new(&self.context)
    }

    /// The recording worker loop, to be spawned as a background task.
    pub fn recording_worker(&self) -> RecordingWorker<S, Db> {
        RecordingWorker::new(&self.context)
    }
}

/// The production station: Redis state store, Postgres catalog.
pub type LiveStation = Station<aircast_core::store::RedisStore, db::PgDatabase>;

impl<S, Db> Clone for StationContext<S, Db> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: self.store.clone(),
            database: self.database.clone(),
            events: self.events.clone(),
            auth: self.auth.clone(),
            media: self.media.clone(),
            user_queue: self.user_queue.clone(),
            fallback_queue: self.fallback_queue.clone(),
            live_control: self.live_control.clone(),
        }
    }
}
