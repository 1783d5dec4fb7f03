use log::{debug, info, warn};
use serde::Serialize;

use aircast_core::{
    channels::QueueSong,
    store::{Lease, StateStore, StoreError},
    Event, QueueKind, QueueSwitchedData, SongChangedData, Source, SourceMetadata,
};

use crate::{db::Database, format_song_id, QueueManager, StationContext};

const OBSERVER_LEASE_KEY: &str = "lease:observer";

/// The derived projection of what is currently audible.
#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub source: Source,
    pub metadata: SourceMetadata,
}

/// One poll's worth of derived state.
#[derive(Debug, Clone)]
pub struct Observation {
    source: Source,
    /// The current queue song, when a queue is the source
    song: Option<QueueSong>,
    /// Song identity: `(file, position)` for queues, the metadata tuple
    /// for the livestream
    identity: Option<String>,
    metadata: SourceMetadata,
}

/// Polls the mixer's queue sockets and the slot flag, derives the active
/// source and its metadata, and emits `queue_switched` / `song_changed`
/// transitions.
pub struct SourceObserver<S, Db> {
    context: StationContext<S, Db>,
    queues: QueueManager<S, Db>,
}

impl<S, Db> SourceObserver<S, Db>
where
    S: StateStore,
    Db: Database,
{
    pub fn new(context: &StationContext<S, Db>) -> Self {
        Self {
            context: context.clone(),
            queues: QueueManager::new(context),
        }
    }

    /// The observer loop. Never crashes out: socket failures read as
    /// silence and the tick is retried on the next interval.
    pub async fn run(self) {
        let interval = self.context.config.poll_interval;
        let lease = Lease::new(OBSERVER_LEASE_KEY, interval * 4);

        info!("Source observer started");

        let mut previous: Option<Observation> = None;

        loop {
            tokio::time::sleep(interval).await;

            match lease.acquire(self.context.store.as_ref()).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("Observer lease check failed: {e}");
                    continue;
                }
            }

            if let Err(e) = self.tick(&mut previous).await {
                warn!("Observer tick failed: {e}");
            }
        }
    }

    /// One poll: derive the projection, record it, and emit transitions
    /// against the previous observation.
    pub async fn tick(&self, previous: &mut Option<Observation>) -> Result<(), StoreError> {
        let Some(current) = self.observe().await? else {
            // Transient mismatch between the mixer and storage; skip the
            // tick rather than emit a spurious change
            return Ok(());
        };

        self.record(&current).await?;

        if let Some(previous) = previous.as_ref() {
            if previous.source != current.source {
                self.context
                    .events
                    .publish(Event::QueueSwitched(QueueSwitchedData {
                        from: previous.source,
                        to: current.source,
                    }))
                    .await;
            }

            let song_changed = (previous.source, &previous.identity)
                != (current.source, &current.identity);

            if song_changed && current.identity.is_some() {
                self.context
                    .events
                    .publish(Event::SongChanged(SongChangedData {
                        source: current.source,
                        song_id: current
                            .song
                            .as_ref()
                            .map(|song| self.prefixed_id(current.source, song)),
                        metadata: current.metadata.clone(),
                    }))
                    .await;
            }

            // Once the mixer has moved past a user-queue song, its file and
            // quota are released
            if previous.source == Source::User {
                if let Some(previous_song) = &previous.song {
                    let moved_on = current.source != Source::User
                        || current.song.as_ref().map(|s| s.id) != Some(previous_song.id);

                    if moved_on {
                        if let Err(e) = self.queues.cleanup_played(previous_song).await {
                            warn!("Failed to clean up played song: {e}");
                        }
                    }
                }
            }
        }

        *previous = Some(current);
        Ok(())
    }

    fn prefixed_id(&self, source: Source, song: &QueueSong) -> String {
        let queue = match source {
            Source::User => QueueKind::User,
            _ => QueueKind::Fallback,
        };

        format_song_id(song.id, queue)
    }

    /// Derives the active source. Returns `None` when the observation is
    /// not trustworthy this tick.
    async fn observe(&self) -> Result<Option<Observation>, StoreError> {
        if self.context.store.get("livestream:active_flag").await?.is_some() {
            let metadata = self
                .context
                .store
                .get("metadata:livestream")
                .await?
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();

            return Ok(Some(Observation {
                source: Source::Livestream,
                song: None,
                identity: Some(metadata_identity(&metadata)),
                metadata,
            }));
        }

        // A queue socket that cannot be reached reads as silent
        let user_song = match self.queue_song(QueueKind::User).await {
            Ok(song) => song,
            Err(e) => {
                debug!("User queue unreachable, treating as silent: {e}");
                None
            }
        };

        if let Some(song) = user_song {
            let file_path = self
                .context
                .config
                .songs_dir
                .join(QueueKind::User.as_str())
                .join(&song.file);

            // The mixer may briefly report a song whose file was already
            // cleaned up; ignore the mismatch until the queues agree
            if !file_path.exists() {
                debug!("User queue reports missing file {}, skipping tick", song.file);
                return Ok(None);
            }

            return Ok(Some(Observation {
                source: Source::User,
                identity: Some(song_identity(&song)),
                metadata: song_metadata(&song),
                song: Some(song),
            }));
        }

        let fallback_song = match self.queue_song(QueueKind::Fallback).await {
            Ok(song) => song,
            Err(e) => {
                debug!("Fallback queue unreachable, treating as silent: {e}");
                None
            }
        };

        Ok(Some(match fallback_song {
            Some(song) => Observation {
                source: Source::Fallback,
                identity: Some(song_identity(&song)),
                metadata: song_metadata(&song),
                song: Some(song),
            },
            None => Observation {
                source: Source::Fallback,
                song: None,
                identity: None,
                metadata: SourceMetadata::default(),
            },
        }))
    }

    async fn queue_song(
        &self,
        queue: QueueKind,
    ) -> Result<Option<QueueSong>, aircast_core::channels::ChannelError> {
        let channel = match queue {
            QueueKind::User => &self.context.user_queue,
            QueueKind::Fallback => &self.context.fallback_queue,
        };

        if !channel.status().await?.playing {
            return Ok(None);
        }

        channel.current().await
    }

    /// Persists the projection so the API can answer "now playing" without
    /// touching the mixer.
    async fn record(&self, observation: &Observation) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&observation.metadata)
            .map_err(|e| StoreError::Unavailable(Box::new(e)))?;

        self.context
            .store
            .set(
                &format!("metadata:{}", observation.source),
                &payload,
            )
            .await?;
        self.context
            .store
            .set("metadata:active_source", observation.source.as_str())
            .await
    }
}

fn song_identity(song: &QueueSong) -> String {
    format!("{}:{}", song.file, song.position)
}

fn metadata_identity(metadata: &SourceMetadata) -> String {
    format!(
        "{}|{}|{}|{}",
        metadata.title.as_deref().unwrap_or_default(),
        metadata.artist.as_deref().unwrap_or_default(),
        metadata.genre.as_deref().unwrap_or_default(),
        metadata.description.as_deref().unwrap_or_default(),
    )
}

fn song_metadata(song: &QueueSong) -> SourceMetadata {
    SourceMetadata {
        title: song.title.clone().or_else(|| Some(song.file.clone())),
        artist: song.artist.clone(),
        genre: song.genre.clone(),
        description: None,
    }
}

/// Reads the recorded projection back out of the state store.
pub async fn now_playing<S>(store: &S) -> Result<NowPlaying, StoreError>
where
    S: StateStore + ?Sized,
{
    if store.get("livestream:active_flag").await?.is_some() {
        let metadata = store
            .get("metadata:livestream")
            .await?
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        return Ok(NowPlaying {
            source: Source::Livestream,
            metadata,
        });
    }

    let source = match store.get("metadata:active_source").await?.as_deref() {
        Some("user") => Source::User,
        _ => Source::Fallback,
    };

    let metadata = store
        .get(&format!("metadata:{source}"))
        .await?
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();

    Ok(NowPlaying { source, metadata })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{test_station, TestMediaTools};
    use aircast_core::{channels::QueueChannel as _, Envelope, EventType};

    async fn drain(subscription: &mut aircast_core::store::Subscription) -> Vec<Envelope> {
        let mut events = vec![];

        while let Ok(Some(message)) = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            subscription.next_message(),
        )
        .await
        {
            events.push(serde_json::from_str(&message.payload).unwrap());
        }

        events
    }

    fn seed_user_song(station: &crate::testing::TestStation, file: &str, title: &str) -> u64 {
        let path = station.context.config.songs_dir.join("user").join(file);
        std::fs::write(path, b"audio").unwrap();
        station.user_queue.push_song(file, Some(title), None)
    }

    #[tokio::test]
    async fn test_switch_to_user_queue_and_back() {
        let station = test_station(TestMediaTools::new(180.0));
        let observer = SourceObserver::new(&station.context);

        station.fallback_queue.push_song("loop.mp3", Some("Loop"), None);
        station.fallback_queue.play().await.unwrap();

        let mut previous = None;
        observer.tick(&mut previous).await.unwrap();

        let mut subscription = station.context.events.subscribe_all().await.unwrap();

        // A user song appears and starts playing
        seed_user_song(&station, "mine.mp3", "Mine");
        station.user_queue.play().await.unwrap();

        observer.tick(&mut previous).await.unwrap();

        let events = drain(&mut subscription).await;
        let kinds: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();

        assert!(
            kinds.contains(&EventType::QueueSwitched.as_str()),
            "switching to the user queue should be announced, got {kinds:?}"
        );
        assert!(kinds.contains(&EventType::SongChanged.as_str()));

        let switched = events
            .iter()
            .find(|e| e.event_type == "queue_switched")
            .unwrap();
        assert_eq!(switched.data["from"], "fallback");
        assert_eq!(switched.data["to"], "user");

        let changed = events
            .iter()
            .find(|e| e.event_type == "song_changed")
            .unwrap();
        assert_eq!(changed.data["source"], "user");
        assert_eq!(changed.data["metadata"]["title"], "Mine");

        // The user song ends and the fallback takes over again
        station.user_queue.set_consume(true).await.unwrap();
        station.user_queue.finish_current();

        observer.tick(&mut previous).await.unwrap();

        let events = drain(&mut subscription).await;
        let switched = events
            .iter()
            .find(|e| e.event_type == "queue_switched")
            .expect("the switch back should be announced");
        assert_eq!(switched.data["from"], "user");
        assert_eq!(switched.data["to"], "fallback");
    }

    #[tokio::test]
    async fn test_no_events_without_a_change() {
        let station = test_station(TestMediaTools::new(180.0));
        let observer = SourceObserver::new(&station.context);

        station.fallback_queue.push_song("loop.mp3", Some("Loop"), None);
        station.fallback_queue.play().await.unwrap();

        let mut previous = None;
        observer.tick(&mut previous).await.unwrap();

        let mut subscription = station.context.events.subscribe_all().await.unwrap();

        observer.tick(&mut previous).await.unwrap();
        observer.tick(&mut previous).await.unwrap();

        assert!(
            drain(&mut subscription).await.is_empty(),
            "steady state must not emit transitions"
        );
    }

    #[tokio::test]
    async fn test_livestream_wins_over_queues() {
        let station = test_station(TestMediaTools::new(180.0));
        let observer = SourceObserver::new(&station.context);

        station.fallback_queue.push_song("loop.mp3", Some("Loop"), None);
        station.fallback_queue.play().await.unwrap();

        let mut previous = None;
        observer.tick(&mut previous).await.unwrap();

        aircast_core::store::StateStore::set(
            station.context.store.as_ref(),
            "livestream:active_flag",
            "1",
        )
        .await
        .unwrap();
        aircast_core::store::StateStore::set(
            station.context.store.as_ref(),
            "metadata:livestream",
            r#"{"title":"Live Hour","artist":"The Host","genre":null,"description":null}"#,
        )
        .await
        .unwrap();

        let mut subscription = station.context.events.subscribe_all().await.unwrap();
        observer.tick(&mut previous).await.unwrap();

        let events = drain(&mut subscription).await;
        let switched = events
            .iter()
            .find(|e| e.event_type == "queue_switched")
            .unwrap();
        assert_eq!(switched.data["to"], "livestream");

        let playing = now_playing(station.context.store.as_ref()).await.unwrap();
        assert_eq!(playing.source, Source::Livestream);
        assert_eq!(playing.metadata.title.as_deref(), Some("Live Hour"));
    }

    #[tokio::test]
    async fn test_missing_file_skips_the_tick() {
        let station = test_station(TestMediaTools::new(180.0));
        let observer = SourceObserver::new(&station.context);

        station.fallback_queue.push_song("loop.mp3", Some("Loop"), None);
        station.fallback_queue.play().await.unwrap();

        let mut previous = None;
        observer.tick(&mut previous).await.unwrap();

        // The user queue reports a song whose file is already gone
        station.user_queue.push_song("vanished.mp3", Some("Gone"), None);
        station.user_queue.play().await.unwrap();

        let mut subscription = station.context.events.subscribe_all().await.unwrap();
        observer.tick(&mut previous).await.unwrap();

        assert!(
            drain(&mut subscription).await.is_empty(),
            "a transient storage mismatch must not emit a spurious change"
        );
        assert_eq!(
            previous.as_ref().unwrap().source,
            Source::Fallback,
            "the previous observation should stand"
        );
    }

    #[tokio::test]
    async fn test_played_user_songs_are_cleaned_up() {
        let station = test_station(TestMediaTools::new(180.0));
        let observer = SourceObserver::new(&station.context);

        let mixer_id = seed_user_song(&station, "played.mp3", "Played");
        station.user_queue.set_consume(true).await.unwrap();
        station.user_queue.play().await.unwrap();

        let mut previous = None;
        observer.tick(&mut previous).await.unwrap();

        let file_path = station.context.config.songs_dir.join("user").join("played.mp3");
        assert!(file_path.exists());

        station.user_queue.finish_current();
        observer.tick(&mut previous).await.unwrap();

        assert!(
            !file_path.exists(),
            "the played song's file should be removed (id {mixer_id})"
        );
    }
}
