use std::path::Path;

use log::{info, warn};

use super::{download::run_tool, InputError};

/// The silence filter applied to finished recordings: strip anything
/// quieter than -50 dB from the head (after 0.1 s) and the tail (after
/// 0.5 s of silence).
const SILENCE_FILTER: &str = "silenceremove=start_periods=1:start_duration=0.1:\
    start_threshold=-50dB:stop_periods=-1:stop_duration=0.5:stop_threshold=-50dB";

/// Measures the duration of an audio file in seconds.
pub async fn probe_duration(path: &Path) -> Result<f64, InputError> {
    let path = path_str(path)?;

    let output = run_tool(
        "ffprobe",
        &[
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            path,
        ],
    )
    .await?;

    output
        .trim()
        .parse()
        .map_err(|_| InputError::ParseError(format!("unparseable duration: {}", output.trim())))
}

/// Removes leading and trailing silence from a recording, replacing the
/// file on success. The original is preserved if trimming fails.
pub async fn trim_silence(path: &Path) -> Result<(), InputError> {
    let trimmed = path.with_extension("trimmed.ogg");

    let result = run_tool(
        "ffmpeg",
        &[
            "-i",
            path_str(path)?,
            "-af",
            SILENCE_FILTER,
            "-c:a",
            "libvorbis",
            "-q:a",
            "5",
            "-y",
            path_str(&trimmed)?,
        ],
    )
    .await;

    match result {
        Ok(_) => {
            tokio::fs::rename(&trimmed, path)
                .await
                .map_err(|e| InputError::FetchError(e.to_string()))?;

            info!("Trimmed silence from {}", path.display());
            Ok(())
        }
        Err(e) => {
            warn!("Failed to trim silence from {}: {e}", path.display());
            let _ = tokio::fs::remove_file(&trimmed).await;
            Err(e)
        }
    }
}

fn path_str(path: &Path) -> Result<&str, InputError> {
    path.to_str()
        .ok_or_else(|| InputError::Invalid("path is not valid UTF-8".to_string()))
}
