use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use serde::Deserialize;
use tokio::{io::AsyncReadExt, process::Command, time::timeout};
use uuid::Uuid;

use super::InputError;

/// Downloads media from URLs through the external download utility,
/// returning a local audio file and its tag metadata.
pub struct Downloader {
    target_dir: PathBuf,
    deadline: Duration,
}

/// What the download utility reports about a resource before download.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_seconds: f64,
}

/// A downloaded song on disk.
#[derive(Debug)]
pub struct DownloadedSong {
    pub path: PathBuf,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_seconds: f64,
}

#[derive(Debug, Deserialize)]
struct ProbedMedia {
    title: Option<String>,
    duration: Option<f64>,
    artist: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    #[serde(rename = "_type")]
    media_type: Option<String>,
}

impl Downloader {
    pub fn new(target_dir: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self {
            target_dir: target_dir.into(),
            deadline,
        }
    }

    /// Fetches metadata without downloading, so over-length media is
    /// refused before any bytes move.
    pub async fn probe(&self, url: &str) -> Result<MediaInfo, InputError> {
        let output = timeout(
            self.deadline,
            run_tool("yt-dlp", &["--skip-download", "-J", "--", url]),
        )
        .await
        .map_err(|_| InputError::Timeout)??;

        let media: ProbedMedia =
            serde_json::from_str(&output).map_err(|e| InputError::ParseError(e.to_string()))?;

        if media.media_type.as_deref() == Some("playlist") {
            return Err(InputError::Invalid("playlists are not allowed".to_string()));
        }

        Ok(MediaInfo {
            duration_seconds: media.duration.unwrap_or(0.0),
            artist: media.artist.or(media.channel).or(media.uploader),
            title: media.title,
        })
    }

    /// Downloads the resource as an mp3 into the target directory.
    pub async fn download(&self, url: &str, info: &MediaInfo) -> Result<DownloadedSong, InputError> {
        let stem = Uuid::new_v4().simple().to_string();
        let template = self.target_dir.join(format!("{stem}.%(ext)s"));
        let path = self.target_dir.join(format!("{stem}.mp3"));

        let template = template
            .to_str()
            .ok_or_else(|| InputError::Invalid("target path is not valid UTF-8".to_string()))?
            .to_string();

        let result = timeout(
            self.deadline,
            run_tool(
                "yt-dlp",
                &[
                    "-x",
                    "--audio-format",
                    "mp3",
                    "--embed-metadata",
                    "--no-playlist",
                    "-o",
                    &template,
                    "--",
                    url,
                ],
            ),
        )
        .await
        .map_err(|_| InputError::Timeout)?;

        if let Err(e) = result {
            // A partial file must not survive a failed download
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        Ok(DownloadedSong {
            path,
            title: info.title.clone(),
            artist: info.artist.clone(),
            duration_seconds: info.duration_seconds,
        })
    }
}

pub(crate) async fn run_tool(program: &str, args: &[&str]) -> Result<String, InputError> {
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| InputError::FetchError(e.to_string()))?;

    let mut output = String::new();

    child
        .stdout
        .take()
        .ok_or_else(|| InputError::FetchError("no stdout".to_string()))?
        .read_to_string(&mut output)
        .await
        .map_err(|e| InputError::FetchError(e.to_string()))?;

    let mut errors = String::new();

    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut errors).await;
    }

    let status = child
        .wait()
        .await
        .map_err(|e| InputError::FetchError(e.to_string()))?;

    if !status.success() {
        return Err(InputError::FetchError(
            errors.lines().last().unwrap_or("tool failed").to_string(),
        ));
    }

    Ok(output)
}

/// Writes uploaded bytes next to the downloads, under a fresh name.
pub async fn store_upload(
    target_dir: &Path,
    original_name: Option<&str>,
    bytes: &[u8],
) -> Result<PathBuf, InputError> {
    let extension = original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .unwrap_or("mp3");

    let path = target_dir.join(format!("{}.{extension}", Uuid::new_v4().simple()));

    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| InputError::FetchError(e.to_string()))?;

    Ok(path)
}
