use std::{
    collections::HashMap,
    path::PathBuf,
};

use log::{error, info, warn};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use aircast_core::{
    store::{StateStore, StoreError},
    Envelope, EventType, LivestreamEndedData, LivestreamStartedData, SourceMetadata,
};

use crate::{
    db::{Database, DatabaseError, NewRecording, RecordingData, RecordingFilter},
    CaptureHandle, StationContext,
};

type Result<T> = std::result::Result<T, RecordingError>;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("recording storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// One in-flight capture, keyed by session id.
struct Capture {
    principal_id: String,
    show_name: Option<String>,
    min_duration: u64,
    path: PathBuf,
    handle: Box<dyn CaptureHandle>,
    /// Metadata snapshot taken when the capture started; refreshed from
    /// the last-seen stream metadata when the session ends.
    metadata: SourceMetadata,
}

/// Captures every accepted live session from the mixer's output,
/// conditionally persists it, and indexes its metadata.
///
/// Capture failures never affect the broadcast.
pub struct RecordingWorker<S, Db> {
    context: StationContext<S, Db>,
    active: Mutex<HashMap<String, Capture>>,
}

impl<S, Db> RecordingWorker<S, Db>
where
    S: StateStore,
    Db: Database,
{
    pub fn new(context: &StationContext<S, Db>) -> Self {
        Self {
            context: context.clone(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self) {
        if let Err(e) = self.reap_orphans().await {
            warn!("Failed to reap orphaned captures: {e}");
        }

        loop {
            let mut subscription = match self
                .context
                .events
                .subscribe(&[EventType::LivestreamStarted, EventType::LivestreamEnded])
                .await
            {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!("Recording worker failed to subscribe: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            info!("Recording worker listening for livestream events");

            while let Some(message) = subscription.next_message().await {
                match serde_json::from_str::<Envelope>(&message.payload) {
                    Ok(envelope) => self.handle_envelope(&envelope).await,
                    Err(e) => warn!("Dropping undecodable event payload: {e}"),
                }
            }

            warn!("Recording worker subscription ended, resubscribing");
        }
    }

    /// A crash mid-session leaves its temporary capture behind; those files
    /// carry no catalog row and are removed on startup.
    pub async fn reap_orphans(&self) -> Result<()> {
        let tmp_dir = self.context.config.recordings_dir.join("tmp");
        tokio::fs::create_dir_all(&tmp_dir).await?;

        let mut entries = tokio::fs::read_dir(&tmp_dir).await?;
        let mut reaped = 0;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                reaped += 1;
            }
        }

        if reaped > 0 {
            info!("Reaped {reaped} orphaned capture(s)");
        }

        Ok(())
    }

    pub async fn handle_envelope(&self, envelope: &Envelope) {
        match envelope.event_type.as_str() {
            "livestream_started" => {
                match serde_json::from_value::<LivestreamStartedData>(envelope.data.clone()) {
                    Ok(data) => self.start_capture(data).await,
                    Err(e) => warn!("Malformed livestream_started payload: {e}"),
                }
            }
            "livestream_ended" => {
                match serde_json::from_value::<LivestreamEndedData>(envelope.data.clone()) {
                    Ok(data) => self.stop_capture(data).await,
                    Err(e) => warn!("Malformed livestream_ended payload: {e}"),
                }
            }
            _ => {}
        }
    }

    async fn start_capture(&self, data: LivestreamStartedData) {
        let mut active = self.active.lock().await;

        if active.contains_key(&data.session_id) {
            warn!("Capture already active for session {}", data.session_id);
            return;
        }

        let path = self
            .context
            .config
            .recordings_dir
            .join("tmp")
            .join(format!("{}.ogg", data.session_id));

        let handle = match self
            .context
            .media
            .start_capture(&self.context.config.output_capture_url, &path)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                // The broadcast goes on; only the archive misses out
                error!("Failed to start capture for {}: {e}", data.session_id);
                return;
            }
        };

        let metadata = self.stream_metadata().await;

        info!(
            "Started capture for session {} (show: {:?})",
            data.session_id, data.show_name
        );

        active.insert(
            data.session_id.clone(),
            Capture {
                principal_id: data.principal_id,
                show_name: data.show_name,
                min_duration: data.min_recording_duration,
                path,
                handle,
                metadata,
            },
        );
    }

    async fn stop_capture(&self, data: LivestreamEndedData) {
        let Some(mut capture) = self.active.lock().await.remove(&data.session_id) else {
            warn!("No active capture for session {}", data.session_id);
            return;
        };

        // Last-seen stream metadata wins over the snapshot taken at start
        let last_seen = self.stream_metadata().await;
        capture.metadata = SourceMetadata {
            title: last_seen.title.or(capture.metadata.title),
            artist: last_seen.artist.or(capture.metadata.artist),
            genre: last_seen.genre.or(capture.metadata.genre),
            description: last_seen.description.or(capture.metadata.description),
        };

        if let Err(e) = capture.handle.stop().await {
            warn!("Failed to stop capture process for {}: {e}", data.session_id);
        }
        capture.handle = Box::new(StoppedCapture);

        if let Err(e) = self.finalize(&data.session_id, capture).await {
            error!("Failed to finalize recording for {}: {e}", data.session_id);
        }
    }

    async fn finalize(&self, session_id: &str, capture: Capture) -> Result<()> {
        if !capture.path.exists() {
            warn!("Capture file missing for session {session_id}");
            return Ok(());
        }

        let media = &self.context.media;

        let duration = match media.file_duration(&capture.path).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Could not measure capture for {session_id}: {e}");
                tokio::fs::remove_file(&capture.path).await?;
                return Ok(());
            }
        };

        if duration < capture.min_duration as f64 {
            tokio::fs::remove_file(&capture.path).await?;
            info!(
                "Discarded capture for {session_id}: too short ({duration:.1}s < {}s)",
                capture.min_duration
            );
            return Ok(());
        }

        // Trimming never makes a recording unusable; keep the raw capture
        // when the filter fails
        let duration = match media.trim_silence(&capture.path).await {
            Ok(()) => media.file_duration(&capture.path).await.unwrap_or(duration),
            Err(e) => {
                warn!("Skipping silence trim for {session_id}: {e}");
                duration
            }
        };

        let show_id = match &capture.show_name {
            Some(show_name) => Some(self.context.database.ensure_show(show_name).await?.id),
            None => None,
        };

        let recording_id = Uuid::new_v4().to_string();
        let file_name = format!("{recording_id}.ogg");
        let final_path = self.context.config.recordings_dir.join(&file_name);

        // Move before insert: a crash here orphans a file, never a row
        tokio::fs::rename(&capture.path, &final_path).await?;

        let recording = self
            .context
            .database
            .create_recording(NewRecording {
                id: recording_id,
                show_id,
                session_id: session_id.to_string(),
                title: capture.metadata.title.clone(),
                artist: capture.metadata.artist.clone(),
                genre: capture.metadata.genre.clone(),
                description: capture.metadata.description.clone(),
                file_path: file_name,
                duration_seconds: duration,
            })
            .await?;

        info!(
            "Saved recording {} ({duration:.1}s, title: {:?}) for {}",
            recording.id, recording.title, capture.principal_id
        );

        Ok(())
    }

    async fn stream_metadata(&self) -> SourceMetadata {
        self.context
            .store
            .get("metadata:livestream")
            .await
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }
}

struct StoppedCapture;

#[async_trait::async_trait]
impl CaptureHandle for StoppedCapture {
    async fn stop(self: Box<Self>) -> std::result::Result<(), crate::InputError> {
        Ok(())
    }
}

/// Catalog-facing recording operations: the indexed archive behind the
/// public listing and streaming endpoints.
pub struct RecordingLibrary<S, Db> {
    context: StationContext<S, Db>,
}

/// A recording joined with the show it belongs to.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub recording: RecordingData,
    pub show_name: Option<String>,
}

impl<S, Db> RecordingLibrary<S, Db>
where
    S: StateStore,
    Db: Database,
{
    pub fn new(context: &StationContext<S, Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    pub async fn list(&self, filter: RecordingFilter) -> Result<(Vec<CatalogEntry>, i64)> {
        let (recordings, total) = self.context.database.list_recordings(filter).await?;

        let mut show_names: HashMap<i64, String> = HashMap::new();
        let mut entries = Vec::with_capacity(recordings.len());

        for recording in recordings {
            let show_name = match recording.show_id {
                Some(show_id) => match show_names.get(&show_id) {
                    Some(name) => Some(name.clone()),
                    None => {
                        let show = self.context.database.show_by_id(show_id).await?;
                        show_names.insert(show_id, show.show_name.clone());
                        Some(show.show_name)
                    }
                },
                None => None,
            };

            entries.push(CatalogEntry {
                recording,
                show_name,
            });
        }

        Ok((entries, total))
    }

    pub async fn get(&self, recording_id: &str) -> Result<RecordingData> {
        Ok(self.context.database.recording_by_id(recording_id).await?)
    }

    /// The absolute path of a recording's audio file.
    pub fn file_path(&self, recording: &RecordingData) -> PathBuf {
        self.context.config.recordings_dir.join(&recording.file_path)
    }

    /// Deletes a recording's file and row.
    pub async fn delete(&self, recording_id: &str) -> Result<()> {
        let recording = self.get(recording_id).await?;
        let path = self.file_path(&recording);

        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }

        self.context.database.delete_recording(recording_id).await?;

        info!("Deleted recording {recording_id}");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{test_station, TestMediaTools};
    use aircast_core::{DisconnectReason, Event, LivestreamStartedData};

    fn started(session_id: &str, min_recording_duration: u64) -> Envelope {
        Event::LivestreamStarted(LivestreamStartedData {
            principal_id: "dj_test".to_string(),
            session_id: session_id.to_string(),
            show_name: Some("Night Shift".to_string()),
            min_recording_duration,
        })
        .envelope()
    }

    fn ended(session_id: &str, duration_seconds: u64) -> Envelope {
        Event::LivestreamEnded(LivestreamEndedData {
            principal_id: "dj_test".to_string(),
            session_id: session_id.to_string(),
            duration_seconds,
            reason: DisconnectReason::Client,
        })
        .envelope()
    }

    #[tokio::test]
    async fn test_short_sessions_leave_nothing_behind() {
        let station = test_station(TestMediaTools::new(180.0).with_file_durations(&[4.0]));
        let worker = RecordingWorker::new(&station.context);

        worker.handle_envelope(&started("s1", 10)).await;
        worker.handle_envelope(&ended("s1", 4)).await;

        let (entries, total) = RecordingLibrary::new(&station.context)
            .list(RecordingFilter {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(total, 0, "a too-short session must not be cataloged");
        assert!(entries.is_empty());

        let leftovers: Vec<_> =
            std::fs::read_dir(station.context.config.recordings_dir.join("tmp"))
                .unwrap()
                .collect();
        assert!(leftovers.is_empty(), "the capture file must be deleted");
    }

    #[tokio::test]
    async fn test_long_sessions_are_persisted_and_indexed() {
        let station =
            test_station(TestMediaTools::new(180.0).with_file_durations(&[20.0, 18.5]));
        let worker = RecordingWorker::new(&station.context);

        // The mixer reported tags during the session
        aircast_core::store::StateStore::set(
            station.context.store.as_ref(),
            "metadata:livestream",
            r#"{"title":"Late Special","artist":"The Host","genre":"ambient","description":null}"#,
        )
        .await
        .unwrap();

        worker.handle_envelope(&started("s2", 10)).await;
        worker.handle_envelope(&ended("s2", 20)).await;

        let library = RecordingLibrary::new(&station.context);
        let (entries, total) = library
            .list(RecordingFilter {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(total, 1);
        let entry = &entries[0];

        assert_eq!(entry.show_name.as_deref(), Some("Night Shift"));
        assert_eq!(entry.recording.title.as_deref(), Some("Late Special"));
        assert_eq!(entry.recording.session_id, "s2");
        assert!(
            (entry.recording.duration_seconds - 18.5).abs() < f64::EPSILON,
            "the post-trim duration should be stored"
        );

        let path = library.file_path(&entry.recording);
        assert!(path.exists(), "the audio file should live in the archive");
        assert!(path.to_string_lossy().ends_with(".ogg"));
    }

    #[tokio::test]
    async fn test_trimming_never_extends_a_recording() {
        let station =
            test_station(TestMediaTools::new(180.0).with_file_durations(&[30.0, 29.0]));
        let worker = RecordingWorker::new(&station.context);

        worker.handle_envelope(&started("s3", 10)).await;
        worker.handle_envelope(&ended("s3", 30)).await;

        let (entries, _) = RecordingLibrary::new(&station.context)
            .list(RecordingFilter {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(
            entries[0].recording.duration_seconds <= 30.0,
            "trimming may only ever shorten a recording"
        );
    }

    #[tokio::test]
    async fn test_orphaned_captures_are_reaped_on_startup() {
        let station = test_station(TestMediaTools::new(180.0));
        let worker = RecordingWorker::new(&station.context);

        let tmp_dir = station.context.config.recordings_dir.join("tmp");
        std::fs::write(tmp_dir.join("dead-session.ogg"), b"leftover").unwrap();

        worker.reap_orphans().await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(&tmp_dir).unwrap().collect();
        assert!(leftovers.is_empty(), "orphaned captures should be removed");
    }

    #[tokio::test]
    async fn test_deleting_a_recording_removes_file_and_row() {
        let station =
            test_station(TestMediaTools::new(180.0).with_file_durations(&[20.0, 20.0]));
        let worker = RecordingWorker::new(&station.context);

        worker.handle_envelope(&started("s4", 10)).await;
        worker.handle_envelope(&ended("s4", 20)).await;

        let library = RecordingLibrary::new(&station.context);
        let (entries, _) = library
            .list(RecordingFilter {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        let id = entries[0].recording.id.clone();
        let path = library.file_path(&entries[0].recording);

        library.delete(&id).await.unwrap();

        assert!(!path.exists());
        assert!(matches!(
            library.get(&id).await,
            Err(RecordingError::Database(DatabaseError::NotFound { .. }))
        ));
    }
}
