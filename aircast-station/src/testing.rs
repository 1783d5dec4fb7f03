//! Shared scaffolding for the crate's tests: an in-memory station context
//! with canned media tooling, so no external processes are involved.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use aircast_core::{
    channels::{MemoryLiveControl, MemoryQueueChannel},
    random_string,
    store::MemoryStore,
    Config, EventBus,
};

use crate::{
    db::MemoryDatabase, Auth, InputError, MediaInfo, MediaTools, StationContext,
};

/// Media tooling with canned answers.
pub struct TestMediaTools {
    pub info: MediaInfo,
    /// Durations reported for local files, consumed front to back; the
    /// last one keeps answering once the queue runs dry.
    durations: Mutex<VecDeque<f64>>,
}

impl TestMediaTools {
    pub fn new(duration: f64) -> Self {
        Self {
            info: MediaInfo {
                title: Some("Test Song".to_string()),
                artist: Some("Test Artist".to_string()),
                duration_seconds: duration,
            },
            durations: Mutex::new(VecDeque::from([duration])),
        }
    }

    pub fn with_file_durations(self, durations: &[f64]) -> Self {
        *self.durations.lock() = durations.iter().copied().collect();
        self
    }
}

#[async_trait]
impl MediaTools for TestMediaTools {
    async fn probe_url(&self, _url: &str) -> Result<MediaInfo, InputError> {
        Ok(self.info.clone())
    }

    async fn download(
        &self,
        url: &str,
        _info: &MediaInfo,
        target_dir: &Path,
    ) -> Result<PathBuf, InputError> {
        let path = target_dir.join(format!("{}.mp3", Uuid::new_v4().simple()));

        tokio::fs::write(&path, url.as_bytes())
            .await
            .map_err(|e| InputError::FetchError(e.to_string()))?;

        Ok(path)
    }

    async fn file_duration(&self, _path: &Path) -> Result<f64, InputError> {
        let mut durations = self.durations.lock();

        if durations.len() > 1 {
            Ok(durations.pop_front().unwrap_or(0.0))
        } else {
            Ok(durations.front().copied().unwrap_or(0.0))
        }
    }

    async fn trim_silence(&self, _path: &Path) -> Result<(), InputError> {
        Ok(())
    }

    async fn start_capture(
        &self,
        _source_url: &str,
        target: &Path,
    ) -> Result<Box<dyn crate::CaptureHandle>, InputError> {
        tokio::fs::write(target, b"captured audio")
            .await
            .map_err(|e| InputError::FetchError(e.to_string()))?;

        Ok(Box::new(TestCapture))
    }
}

struct TestCapture;

#[async_trait]
impl crate::CaptureHandle for TestCapture {
    async fn stop(self: Box<Self>) -> Result<(), InputError> {
        Ok(())
    }
}

pub struct TestStation {
    pub context: StationContext<MemoryStore, MemoryDatabase>,
    pub user_queue: Arc<MemoryQueueChannel>,
    pub fallback_queue: Arc<MemoryQueueChannel>,
    pub live_control: Arc<MemoryLiveControl>,
}

/// Builds a station context over in-memory backends, with song and
/// recording directories under the system temp dir.
pub fn test_station(media: TestMediaTools) -> TestStation {
    let scratch = std::env::temp_dir().join(format!("aircast-test-{}", random_string(8)));

    let mut config = Config::default();
    config.songs_dir = scratch.join("songs");
    config.recordings_dir = scratch.join("recordings");

    for dir in [
        config.songs_dir.join("tmp"),
        config.songs_dir.join("user"),
        config.songs_dir.join("fallback"),
        config.recordings_dir.join("tmp"),
    ] {
        std::fs::create_dir_all(dir).expect("test directories are created");
    }

    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(Auth::new(
        config.admin_api_tokens.clone(),
        config.internal_api_token.clone(),
        &config.jwt_secret,
    ));

    let user_queue = Arc::new(MemoryQueueChannel::new());
    let fallback_queue = Arc::new(MemoryQueueChannel::new());
    let live_control = Arc::new(MemoryLiveControl::new());

    let context = StationContext {
        config,
        store: store.clone(),
        database: Arc::new(MemoryDatabase::new()),
        events: EventBus::new(store),
        auth,
        media: Arc::new(media),
        user_queue: user_queue.clone(),
        fallback_queue: fallback_queue.clone(),
        live_control: live_control.clone(),
    };

    TestStation {
        context,
        user_queue,
        fallback_queue,
        live_control,
    }
}
