use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;

use super::{probe_duration, Downloader, InputError, MediaInfo};

/// The external media tooling the queue controller and recording worker
/// lean on: URL probing, downloading, and file inspection.
#[async_trait]
pub trait MediaTools: Send + Sync + 'static {
    /// Fetches metadata for a URL without downloading it.
    async fn probe_url(&self, url: &str) -> Result<MediaInfo, InputError>;

    /// Downloads a URL as an audio file into the given directory.
    async fn download(
        &self,
        url: &str,
        info: &MediaInfo,
        target_dir: &Path,
    ) -> Result<PathBuf, InputError>;

    /// Measures the duration of a local audio file in seconds.
    async fn file_duration(&self, path: &Path) -> Result<f64, InputError>;

    /// Strips leading and trailing silence from a local audio file.
    async fn trim_silence(&self, path: &Path) -> Result<(), InputError>;

    /// Starts capturing an audio stream into a local Ogg/Vorbis file,
    /// returning a handle that stops the capture.
    async fn start_capture(
        &self,
        source_url: &str,
        target: &Path,
    ) -> Result<Box<dyn CaptureHandle>, InputError>;
}

/// A running stream capture.
#[async_trait]
pub trait CaptureHandle: Send + Sync {
    async fn stop(self: Box<Self>) -> Result<(), InputError>;
}

struct FfmpegCapture {
    child: tokio::process::Child,
}

#[async_trait]
impl CaptureHandle for FfmpegCapture {
    async fn stop(mut self: Box<Self>) -> Result<(), InputError> {
        if self.child.try_wait().ok().flatten().is_some() {
            // The capture process already exited on its own
            return Ok(());
        }

        self.child
            .kill()
            .await
            .map_err(|e| InputError::FetchError(e.to_string()))?;

        Ok(())
    }
}

/// Production implementation backed by the download utility and ffprobe.
pub struct ExternalMediaTools {
    deadline: std::time::Duration,
}

impl ExternalMediaTools {
    pub fn new(deadline: std::time::Duration) -> Self {
        Self { deadline }
    }
}

#[async_trait]
impl MediaTools for ExternalMediaTools {
    async fn probe_url(&self, url: &str) -> Result<MediaInfo, InputError> {
        Downloader::new(std::env::temp_dir(), self.deadline)
            .probe(url)
            .await
    }

    async fn download(
        &self,
        url: &str,
        info: &MediaInfo,
        target_dir: &Path,
    ) -> Result<PathBuf, InputError> {
        Downloader::new(target_dir, self.deadline)
            .download(url, info)
            .await
            .map(|song| song.path)
    }

    async fn file_duration(&self, path: &Path) -> Result<f64, InputError> {
        probe_duration(path).await
    }

    async fn trim_silence(&self, path: &Path) -> Result<(), InputError> {
        super::trim_silence(path).await
    }

    async fn start_capture(
        &self,
        source_url: &str,
        target: &Path,
    ) -> Result<Box<dyn CaptureHandle>, InputError> {
        let target = target
            .to_str()
            .ok_or_else(|| InputError::Invalid("target path is not valid UTF-8".to_string()))?;

        let child = Command::new("ffmpeg")
            .args(["-i", source_url, "-c:a", "libvorbis", "-f", "ogg", "-y", target])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| InputError::FetchError(e.to_string()))?;

        Ok(Box::new(FfmpegCapture { child }))
    }
}
