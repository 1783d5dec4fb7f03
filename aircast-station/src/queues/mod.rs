use std::{path::PathBuf, time::Duration};

use log::{info, warn};
use thiserror::Error;

use aircast_core::{
    channels::{ChannelError, QueueChannel, QueueSong, SourceChannel},
    store::{StateStore, StoreError},
    QueueKind,
};

use crate::{
    db::Database, fingerprint_bytes, fingerprint_url, InputError, StationContext, UserClaims,
};

/// How long per-user quota bookkeeping survives without activity. Twice the
/// longest token lifetime, so quotas always outlive the tokens they bound.
const QUOTA_TTL: Duration = Duration::from_secs(2 * 86400);

/// The most songs a public listing may return.
pub const PUBLIC_LIST_LIMIT: usize = 20;

type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The lifetime add allowance is used up
    #[error("Add request limit exceeded: {used}/{limit} total requests used")]
    QuotaExhausted { used: u32, limit: u32 },
    /// The queue already holds as many songs as the principal may keep
    #[error("Queue limit exceeded: {used}/{limit} songs in queue")]
    QueueFull { used: u32, limit: u32 },
    #[error("Song duration ({actual:.1} min) exceeds maximum allowed duration ({limit:.0} min)")]
    TooLong { actual: f64, limit: f64 },
    #[error("Song is already queued within the next {0} songs")]
    Duplicate(usize),
    #[error("{0}")]
    BadInput(String),
    #[error("Song {0} does not exist")]
    NotFound(String),
    #[error("Song {0} belongs to another user")]
    NotOwner(String),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// A playback action addressed at one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackAction {
    Play,
    Pause,
    Resume,
}

/// One of `{url, file}`, plus optional caller-supplied tags.
#[derive(Debug, Default)]
pub struct AddSong {
    pub url: Option<String>,
    pub file: Option<UploadedFile>,
    pub song_name: Option<String>,
    pub artist: Option<String>,
}

#[derive(Debug)]
pub struct UploadedFile {
    pub name: Option<String>,
    pub bytes: Vec<u8>,
}

/// A song as listed to callers.
#[derive(Debug, Clone)]
pub struct SongEntry {
    pub song_id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub queue: QueueKind,
}

/// Formats a mixer-assigned id as the external, queue-prefixed song id.
pub fn format_song_id(mixer_id: u64, queue: QueueKind) -> String {
    let prefix = match queue {
        QueueKind::User => "u",
        QueueKind::Fallback => "f",
    };

    format!("{prefix}-{mixer_id}")
}

/// Parses a queue-prefixed song id back into its parts.
pub fn parse_song_id(song_id: &str) -> Result<(u64, QueueKind)> {
    let (prefix, raw_id) = song_id
        .split_once('-')
        .ok_or_else(|| QueueError::BadInput(format!("Invalid song ID format: {song_id}")))?;

    let queue = match prefix {
        "u" => QueueKind::User,
        "f" => QueueKind::Fallback,
        other => {
            return Err(QueueError::BadInput(format!(
                "Invalid song ID prefix: {other}"
            )))
        }
    };

    let mixer_id = raw_id
        .parse()
        .map_err(|_| QueueError::BadInput(format!("Invalid song ID format: {song_id}")))?;

    Ok((mixer_id, queue))
}

/// Admits media into the two queues, owns quota enforcement and duplicate
/// prevention, and cleans up user-queue songs after playback.
pub struct QueueManager<S, Db> {
    context: StationContext<S, Db>,
}

impl<S, Db> QueueManager<S, Db>
where
    S: StateStore,
    Db: Database,
{
    pub fn new(context: &StationContext<S, Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    fn channel(&self, queue: QueueKind) -> &dyn QueueChannel {
        match queue {
            QueueKind::User => self.context.user_queue.as_ref(),
            QueueKind::Fallback => self.context.fallback_queue.as_ref(),
        }
    }

    /// The uniform control surface over a queue's transport.
    fn source_channel(&self, queue: QueueKind) -> SourceChannel {
        match queue {
            QueueKind::User => SourceChannel::UserQueue(self.context.user_queue.clone()),
            QueueKind::Fallback => SourceChannel::FallbackQueue(self.context.fallback_queue.clone()),
        }
    }

    /// Admits a song into the user queue on behalf of a user principal,
    /// enforcing every precondition in order. A failed admission leaves no
    /// durable trace.
    pub async fn add_for_user(&self, claims: &UserClaims, request: AddSong) -> Result<String> {
        let store = &self.context.store;
        let adds_key = format!("quota:{}:adds", claims.user_id);
        let queued_key = format!("quota:{}:queued", claims.user_id);

        // Reserve both counters up front so concurrent admissions cannot
        // slip past the limits, then roll back if anything later fails.
        let adds = store.incr(&adds_key).await?;
        store.expire(&adds_key, QUOTA_TTL).await?;

        if adds > claims.max_add_requests as i64 {
            store.decr(&adds_key).await?;
            return Err(QueueError::QuotaExhausted {
                used: (adds - 1) as u32,
                limit: claims.max_add_requests,
            });
        }

        let queued = store.incr(&queued_key).await?;
        store.expire(&queued_key, QUOTA_TTL).await?;

        if queued > claims.max_queue_songs as i64 {
            store.decr(&queued_key).await?;
            store.decr(&adds_key).await?;
            return Err(QueueError::QueueFull {
                used: (queued - 1) as u32,
                limit: claims.max_queue_songs,
            });
        }

        match self
            .admit(QueueKind::User, request, Some(&claims.user_id), true)
            .await
        {
            Ok(song_id) => Ok(song_id),
            Err(e) => {
                store.decr(&queued_key).await?;
                store.decr(&adds_key).await?;
                Err(e)
            }
        }
    }

    /// Admits a song on admin authority, into either queue. Bypasses every
    /// precondition and updates no quotas.
    pub async fn add_admin(&self, queue: QueueKind, request: AddSong) -> Result<String> {
        self.admit(queue, request, None, false).await
    }

    async fn admit(
        &self,
        queue: QueueKind,
        request: AddSong,
        owner: Option<&str>,
        validate: bool,
    ) -> Result<String> {
        let config = &self.context.config;
        let tmp_dir = config.songs_dir.join("tmp");

        // Resolve the input to a local file and a fingerprint
        let (temp_path, fingerprint, title, artist) = match (&request.url, &request.file) {
            (Some(_), Some(_)) => {
                return Err(QueueError::BadInput(
                    "Cannot provide both URL and file".to_string(),
                ))
            }
            (None, None) => {
                return Err(QueueError::BadInput(
                    "No valid URL or file provided".to_string(),
                ))
            }
            (Some(url), None) => {
                let fingerprint = fingerprint_url(url)
                    .map_err(|e| QueueError::BadInput(e.to_string()))?;

                let info = self.context.media.probe_url(url).await?;

                if validate && info.duration_seconds > config.max_song_duration as f64 {
                    return Err(QueueError::TooLong {
                        actual: info.duration_seconds / 60.0,
                        limit: config.max_song_duration as f64 / 60.0,
                    });
                }

                if validate {
                    self.check_duplicate(&fingerprint).await?;
                }

                let path = self.context.media.download(url, &info, &tmp_dir).await?;

                let title = request.song_name.clone().or(info.title);
                let artist = request.artist.clone().or(info.artist);

                (path, fingerprint, title, artist)
            }
            (None, Some(file)) => {
                if validate && file.bytes.len() as u64 > config.max_file_size {
                    return Err(QueueError::BadInput(format!(
                        "File size ({} bytes) exceeds maximum allowed size ({} bytes)",
                        file.bytes.len(),
                        config.max_file_size
                    )));
                }

                let fingerprint = fingerprint_bytes(&file.bytes);

                let path =
                    crate::store_upload(&tmp_dir, file.name.as_deref(), &file.bytes).await?;

                if validate {
                    let duration = match self.context.media.file_duration(&path).await {
                        Ok(duration) => duration,
                        Err(e) => {
                            remove_file(&path).await;
                            return Err(e.into());
                        }
                    };

                    if duration > config.max_song_duration as f64 {
                        remove_file(&path).await;
                        return Err(QueueError::TooLong {
                            actual: duration / 60.0,
                            limit: config.max_song_duration as f64 / 60.0,
                        });
                    }

                    if let Err(e) = self.check_duplicate(&fingerprint).await {
                        remove_file(&path).await;
                        return Err(e);
                    }
                }

                (path, fingerprint, request.song_name.clone(), request.artist.clone())
            }
        };

        // Move into the queue's music directory
        let file_name = temp_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| QueueError::BadInput("unusable file name".to_string()))?
            .to_string();

        let final_path = config.songs_dir.join(queue.as_str()).join(&file_name);

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            remove_file(&temp_path).await;
            return Err(QueueError::Store(StoreError::Unavailable(Box::new(e))));
        }

        // Hand the file to the mixer queue
        let mixer_id = match self.channel(queue).add(&file_name).await {
            Ok(mixer_id) => mixer_id,
            Err(e) => {
                remove_file(&final_path).await;
                return Err(e.into());
            }
        };

        let song_id = format_song_id(mixer_id, queue);

        if let Some(owner) = owner {
            if let Err(e) = self
                .track_user_song(owner, &song_id, mixer_id, &file_name, &fingerprint)
                .await
            {
                let _ = self.channel(queue).remove(mixer_id).await;
                remove_file(&final_path).await;
                return Err(e);
            }
        }

        // Arm the queue's playback mode and make sure it is running
        let channel = self.channel(queue);
        match queue {
            QueueKind::User => channel.set_consume(true).await?,
            QueueKind::Fallback => {
                channel.set_repeat(true).await?;
                channel.set_random(true).await?;
            }
        }
        channel.play().await?;

        info!(
            "Added song to {queue} queue: {} (ID: {song_id}, title: {:?}, artist: {:?})",
            file_name, title, artist
        );

        Ok(song_id)
    }

    async fn track_user_song(
        &self,
        owner: &str,
        song_id: &str,
        mixer_id: u64,
        file_name: &str,
        fingerprint: &str,
    ) -> Result<()> {
        let store = &self.context.store;
        let songs_key = format!("quota:{owner}:songs");

        store
            .set_add(&songs_key, &format!("{mixer_id}:{file_name}"))
            .await?;
        store.expire(&songs_key, QUOTA_TTL).await?;
        store
            .set_ex(&format!("song:{song_id}:owner"), owner, QUOTA_TTL)
            .await?;
        store
            .hash_set("queue:user:fingerprints", song_id, fingerprint)
            .await?;

        Ok(())
    }

    /// The fingerprint must not match any song in the next few positions of
    /// the user queue.
    async fn check_duplicate(&self, fingerprint: &str) -> Result<()> {
        let window = self.context.config.dup_window;

        let upcoming: Vec<QueueSong> = self
            .context
            .user_queue
            .songs()
            .await?
            .into_iter()
            .take(window)
            .collect();

        for song in upcoming {
            let song_id = format_song_id(song.id, QueueKind::User);

            let existing = self
                .context
                .store
                .hash_get("queue:user:fingerprints", &song_id)
                .await?;

            if existing.as_deref() == Some(fingerprint) {
                return Err(QueueError::Duplicate(window));
            }
        }

        Ok(())
    }

    /// Deletes one of the caller's own songs from the user queue. The
    /// lifetime add count is not touched.
    pub async fn delete_for_user(&self, claims: &UserClaims, song_id: &str) -> Result<()> {
        let (mixer_id, queue) = parse_song_id(song_id)?;

        if queue != QueueKind::User {
            return Err(QueueError::BadInput(
                "Can only delete from user queue".to_string(),
            ));
        }

        let owner = self
            .context
            .store
            .get(&format!("song:{song_id}:owner"))
            .await?
            .ok_or_else(|| QueueError::NotFound(song_id.to_string()))?;

        if owner != claims.user_id {
            return Err(QueueError::NotOwner(song_id.to_string()));
        }

        self.remove_song(queue, mixer_id, song_id, &owner).await
    }

    /// Deletes any song from either queue on admin authority.
    pub async fn delete_admin(&self, queue: QueueKind, song_id: &str) -> Result<()> {
        let (mixer_id, parsed_queue) = parse_song_id(song_id)?;

        if parsed_queue != queue {
            return Err(QueueError::BadInput(format!(
                "Song ID prefix '{parsed_queue}' doesn't match queue '{queue}'"
            )));
        }

        let owner = self
            .context
            .store
            .get(&format!("song:{song_id}:owner"))
            .await?;

        match owner {
            Some(owner) => self.remove_song(queue, mixer_id, song_id, &owner).await,
            None => self
                .channel(queue)
                .remove(mixer_id)
                .await
                .map_err(Into::into),
        }
    }

    async fn remove_song(
        &self,
        queue: QueueKind,
        mixer_id: u64,
        song_id: &str,
        owner: &str,
    ) -> Result<()> {
        self.channel(queue).remove(mixer_id).await?;
        self.untrack_user_song(owner, mixer_id, song_id).await?;

        info!("Deleted song {song_id} from {queue} queue");
        Ok(())
    }

    async fn untrack_user_song(&self, owner: &str, mixer_id: u64, song_id: &str) -> Result<()> {
        let store = &self.context.store;
        let songs_key = format!("quota:{owner}:songs");

        let entry = store
            .set_members(&songs_key)
            .await?
            .into_iter()
            .find(|entry| entry.starts_with(&format!("{mixer_id}:")));

        if let Some(entry) = entry {
            store.set_rem(&songs_key, &entry).await?;
        }

        let queued_key = format!("quota:{owner}:queued");
        if store.decr(&queued_key).await? < 0 {
            // Never let cleanup races drive the bound negative
            store.incr(&queued_key).await?;
        }

        store.del(&format!("song:{song_id}:owner")).await?;
        store.hash_del("queue:user:fingerprints", song_id).await?;

        Ok(())
    }

    /// Removes a played user-queue song from storage and releases its
    /// quota, once the mixer has moved past it.
    pub async fn cleanup_played(&self, song: &QueueSong) -> Result<()> {
        let song_id = format_song_id(song.id, QueueKind::User);

        let owner = self
            .context
            .store
            .get(&format!("song:{song_id}:owner"))
            .await?;

        let file_path = self
            .context
            .config
            .songs_dir
            .join(QueueKind::User.as_str())
            .join(&song.file);

        remove_file(&file_path).await;

        if let Some(owner) = owner {
            self.untrack_user_song(&owner, song.id, &song_id).await?;
        }

        info!("Cleaned up played song {song_id} ({})", song.file);
        Ok(())
    }

    /// The next songs the station will play: the user queue first, topped
    /// up from the fallback queue.
    pub async fn next_songs(&self, limit: usize) -> Result<Vec<SongEntry>> {
        let mut songs = self.list(QueueKind::User).await?;
        songs.truncate(limit);

        if songs.len() < limit {
            let remaining = limit - songs.len();
            let mut fallback = self.list(QueueKind::Fallback).await?;
            fallback.truncate(remaining);
            songs.extend(fallback);
        }

        Ok(songs)
    }

    pub async fn list(&self, queue: QueueKind) -> Result<Vec<SongEntry>> {
        let songs = self.channel(queue).songs().await?;

        Ok(songs
            .into_iter()
            .map(|song| SongEntry {
                song_id: format_song_id(song.id, queue),
                title: song.title.or(Some(song.file)),
                artist: song.artist,
                queue,
            })
            .collect())
    }

    pub async fn clear(&self, queue: QueueKind) -> Result<()> {
        self.channel(queue).clear().await?;

        if queue == QueueKind::User {
            // Fingerprints are per user queue; ownership records lapse with
            // their TTL
            self.context.store.del("queue:user:fingerprints").await?;
        }

        info!("Cleared {queue} queue");
        Ok(())
    }

    pub async fn control(&self, queue: QueueKind, action: PlaybackAction) -> Result<()> {
        let channel = self.source_channel(queue);

        match action {
            PlaybackAction::Play => {
                if queue == QueueKind::Fallback {
                    self.channel(queue).set_repeat(true).await?;
                    self.channel(queue).set_random(true).await?;
                }
                channel.play().await?;
            }
            PlaybackAction::Pause => channel.pause().await?,
            PlaybackAction::Resume => channel.resume().await?,
        }

        info!("Playback {action:?} on {queue} queue");
        Ok(())
    }

    /// Re-arms both queues after a restart: playback modes are reapplied
    /// and any queue holding songs starts playing.
    pub async fn resume_on_startup(&self) {
        for queue in [QueueKind::User, QueueKind::Fallback] {
            if let Err(e) = self.resume_queue(queue).await {
                warn!("Failed to resume {queue} queue: {e}");
            }
        }
    }

    async fn resume_queue(&self, queue: QueueKind) -> Result<()> {
        let channel = self.channel(queue);
        let status = channel.status().await?;

        if status.queue_length == 0 {
            info!("{queue} queue empty");
            return Ok(());
        }

        match queue {
            QueueKind::User => channel.set_consume(true).await?,
            QueueKind::Fallback => {
                channel.set_repeat(true).await?;
                channel.set_random(true).await?;
            }
        }

        info!(
            "{queue} queue: {} songs, starting playback",
            status.queue_length
        );
        channel.play().await?;
        Ok(())
    }
}

async fn remove_file(path: &PathBuf) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to clean up {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{test_station, TestMediaTools};
    use crate::UserClaims;

    fn claims(user_id: &str, max_queue_songs: u32, max_add_requests: u32) -> UserClaims {
        UserClaims::for_tests(user_id, max_queue_songs, max_add_requests)
    }

    fn upload(bytes: &[u8]) -> AddSong {
        AddSong {
            file: Some(UploadedFile {
                name: Some("song.mp3".to_string()),
                bytes: bytes.to_vec(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_song_id_round_trip() {
        assert_eq!(format_song_id(17, QueueKind::User), "u-17");
        assert_eq!(format_song_id(3, QueueKind::Fallback), "f-3");

        assert_eq!(parse_song_id("u-17").unwrap(), (17, QueueKind::User));
        assert_eq!(parse_song_id("f-3").unwrap(), (3, QueueKind::Fallback));

        assert!(parse_song_id("17").is_err(), "missing prefix");
        assert!(parse_song_id("x-17").is_err(), "unknown prefix");
        assert!(parse_song_id("u-abc").is_err(), "non-numeric id");
    }

    #[tokio::test]
    async fn test_quota_lifecycle() {
        let station = test_station(TestMediaTools::new(180.0));
        let queues = QueueManager::new(&station.context);
        let user = claims("alice", 2, 3);

        queues.add_for_user(&user, upload(b"a")).await.unwrap();
        let b_id = queues.add_for_user(&user, upload(b"b")).await.unwrap();

        let full = queues.add_for_user(&user, upload(b"c")).await;
        assert!(
            matches!(full, Err(QueueError::QueueFull { used: 2, limit: 2 })),
            "a third song should not fit a queue of two, got {full:?}"
        );

        // Deleting frees a queue slot but never refunds the lifetime count
        queues.delete_for_user(&user, &b_id).await.unwrap();
        queues.add_for_user(&user, upload(b"c")).await.unwrap();

        let exhausted = queues.add_for_user(&user, upload(b"d")).await;
        assert!(
            matches!(exhausted, Err(QueueError::QuotaExhausted { used: 3, limit: 3 })),
            "the lifetime allowance should be spent, got {exhausted:?}"
        );
    }

    #[tokio::test]
    async fn test_lifetime_count_is_monotonic() {
        let station = test_station(TestMediaTools::new(180.0));
        let queues = QueueManager::new(&station.context);
        let user = claims("bob", 5, 10);

        let song_id = queues.add_for_user(&user, upload(b"a")).await.unwrap();

        let before = station.context.store.get("quota:bob:adds").await.unwrap();
        queues.delete_for_user(&user, &song_id).await.unwrap();
        let after = station.context.store.get("quota:bob:adds").await.unwrap();

        assert_eq!(before, after, "deletion must not decrement the add count");
        assert_eq!(
            station.context.store.get("quota:bob:queued").await.unwrap(),
            Some("0".to_string()),
            "deletion should free the queue slot"
        );
    }

    #[tokio::test]
    async fn test_concurrent_admissions_respect_the_bound() {
        let station = test_station(TestMediaTools::new(180.0));
        let queues = Arc::new(QueueManager::new(&station.context));
        let user = claims("carol", 1, 50);

        let attempts: Vec<_> = (0..8)
            .map(|n| {
                let queues = queues.clone();
                let user = user.clone();

                tokio::spawn(async move {
                    queues
                        .add_for_user(&user, upload(format!("song-{n}").as_bytes()))
                        .await
                })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1, "exactly one admission may pass a bound of one");
        assert_eq!(
            station.user_queue.songs().await.unwrap().len(),
            1,
            "the queue itself should hold exactly one song"
        );
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_is_refused() {
        let station = test_station(TestMediaTools::new(180.0));
        let queues = QueueManager::new(&station.context);
        let user = claims("dave", 10, 10);

        queues.add_for_user(&user, upload(b"same bytes")).await.unwrap();

        let duplicate = queues.add_for_user(&user, upload(b"same bytes")).await;
        assert!(
            matches!(duplicate, Err(QueueError::Duplicate(_))),
            "identical content should be refused, got {duplicate:?}"
        );

        // A failed attempt leaves no durable trace
        assert_eq!(
            station.context.store.get("quota:dave:adds").await.unwrap(),
            Some("1".to_string())
        );

        let different = queues.add_for_user(&user, upload(b"other bytes")).await;
        assert!(different.is_ok(), "distinct content should be admitted");
    }

    #[tokio::test]
    async fn test_too_long_songs_are_refused_and_removed() {
        let station = test_station(TestMediaTools::new(3600.0));
        let queues = QueueManager::new(&station.context);
        let user = claims("erin", 10, 10);

        let refused = queues.add_for_user(&user, upload(b"endless mix")).await;
        assert!(
            matches!(refused, Err(QueueError::TooLong { .. })),
            "an hour-long song should be refused, got {refused:?}"
        );

        let leftovers: Vec<_> = std::fs::read_dir(station.context.config.songs_dir.join("tmp"))
            .unwrap()
            .collect();
        assert!(
            leftovers.is_empty(),
            "a refused upload must not linger on disk"
        );
    }

    #[tokio::test]
    async fn test_admin_admission_bypasses_preconditions() {
        let station = test_station(TestMediaTools::new(3600.0));
        let queues = QueueManager::new(&station.context);

        let song_id = queues
            .add_admin(QueueKind::Fallback, upload(b"the whole show"))
            .await
            .unwrap();

        assert!(song_id.starts_with("f-"));
        assert_eq!(station.fallback_queue.songs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_users_cannot_delete_foreign_songs() {
        let station = test_station(TestMediaTools::new(180.0));
        let queues = QueueManager::new(&station.context);

        let owner = claims("frank", 5, 5);
        let song_id = queues.add_for_user(&owner, upload(b"mine")).await.unwrap();

        let thief = claims("grace", 5, 5);
        let refused = queues.delete_for_user(&thief, &song_id).await;

        assert!(
            matches!(refused, Err(QueueError::NotOwner(_))),
            "only the owner may delete a song, got {refused:?}"
        );
    }

    #[tokio::test]
    async fn test_cleanup_after_playback_frees_quota_and_storage() {
        let station = test_station(TestMediaTools::new(180.0));
        let queues = QueueManager::new(&station.context);
        let user = claims("heidi", 1, 10);

        queues.add_for_user(&user, upload(b"played out")).await.unwrap();

        let song = station.user_queue.songs().await.unwrap()[0].clone();
        let file_path = station
            .context
            .config
            .songs_dir
            .join("user")
            .join(&song.file);
        assert!(file_path.exists(), "the admitted song should be on disk");

        queues.cleanup_played(&song).await.unwrap();

        assert!(!file_path.exists(), "playback cleanup should delete the file");
        assert_eq!(
            station.context.store.get("quota:heidi:queued").await.unwrap(),
            Some("0".to_string()),
            "playback cleanup should free the queue slot"
        );

        // The freed slot is usable again
        queues.add_for_user(&user, upload(b"next up")).await.unwrap();
    }

    #[tokio::test]
    async fn test_next_songs_prefers_the_user_queue() {
        let station = test_station(TestMediaTools::new(180.0));
        let queues = QueueManager::new(&station.context);

        station.fallback_queue.push_song("f1.mp3", Some("Fallback One"), None);
        station.fallback_queue.push_song("f2.mp3", Some("Fallback Two"), None);
        station.user_queue.push_song("u1.mp3", Some("User One"), None);

        let songs = queues.next_songs(2).await.unwrap();

        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].queue, QueueKind::User);
        assert_eq!(songs[0].title.as_deref(), Some("User One"));
        assert_eq!(songs[1].queue, QueueKind::Fallback);
    }
}
