use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LiveControl, QueueChannel, QueueSong, QueueStatus, Result};

/// An in-process queue channel, used by tests and development setups that
/// run without a mixer.
#[derive(Default)]
pub struct MemoryQueueChannel {
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    songs: Vec<QueueSong>,
    playing: bool,
    consume: bool,
    repeat: bool,
    random: bool,
    next_id: u64,
}

impl MemoryQueueChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a song directly, the way the mixer would after scanning.
    pub fn push_song(&self, file: &str, title: Option<&str>, artist: Option<&str>) -> u64 {
        let mut state = self.state.lock();

        state.next_id += 1;
        let id = state.next_id;
        let position = state.songs.len() as u64;

        state.songs.push(QueueSong {
            id,
            file: file.to_string(),
            position,
            title: title.map(str::to_string),
            artist: artist.map(str::to_string),
            genre: None,
            duration_seconds: None,
        });

        id
    }

    /// Simulates the current song finishing playback.
    pub fn finish_current(&self) {
        let mut state = self.state.lock();

        if !state.songs.is_empty() {
            if state.consume {
                state.songs.remove(0);
            } else if state.repeat {
                let first = state.songs.remove(0);
                state.songs.push(first);
            } else {
                state.songs.remove(0);
            }

            for (position, song) in state.songs.iter_mut().enumerate() {
                song.position = position as u64;
            }
        }

        if state.songs.is_empty() {
            state.playing = false;
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }
}

#[async_trait]
impl QueueChannel for MemoryQueueChannel {
    async fn status(&self) -> Result<QueueStatus> {
        let state = self.state.lock();

        Ok(QueueStatus {
            playing: state.playing && !state.songs.is_empty(),
            queue_length: state.songs.len() as u64,
        })
    }

    async fn current(&self) -> Result<Option<QueueSong>> {
        let state = self.state.lock();

        if !state.playing {
            return Ok(None);
        }

        Ok(state.songs.first().cloned())
    }

    async fn songs(&self) -> Result<Vec<QueueSong>> {
        Ok(self.state.lock().songs.clone())
    }

    async fn add(&self, file: &str) -> Result<u64> {
        Ok(self.push_song(file, None, None))
    }

    async fn remove(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.songs.retain(|song| song.id != id);

        for (position, song) in state.songs.iter_mut().enumerate() {
            song.position = position as u64;
        }

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.state.lock().songs.clear();
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.state.lock().playing = true;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.state.lock().playing = false;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.state.lock().playing = true;
        Ok(())
    }

    async fn set_consume(&self, enabled: bool) -> Result<()> {
        self.state.lock().consume = enabled;
        Ok(())
    }

    async fn set_repeat(&self, enabled: bool) -> Result<()> {
        self.state.lock().repeat = enabled;
        Ok(())
    }

    async fn set_random(&self, enabled: bool) -> Result<()> {
        self.state.lock().random = enabled;
        Ok(())
    }
}

/// A live control that only records the disconnects it was asked for.
#[derive(Default)]
pub struct MemoryLiveControl {
    disconnects: Mutex<Vec<String>>,
}

impl MemoryLiveControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.disconnects.lock().clone()
    }
}

#[async_trait]
impl LiveControl for MemoryLiveControl {
    async fn disconnect(&self, input_id: &str) -> Result<()> {
        self.disconnects.lock().push(input_id.to_string());
        Ok(())
    }
}
