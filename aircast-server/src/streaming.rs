use axum::{
    body::Body,
    extract::Path,
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::{
    context::ServerContext,
    errors::{ServerError, ServerResult},
};

/// A parsed `bytes=start-end` range, clamped to the file size.
fn parse_range(headers: &HeaderMap, size: u64) -> Option<(u64, u64)> {
    let raw = headers.get(header::RANGE)?.to_str().ok()?;
    let ranges = raw.strip_prefix("bytes=")?;

    // Only the first range of a set is honored
    let range = ranges.split(',').next()?.trim();
    let (start, end) = range.split_once('-')?;

    let (start, end) = if start.is_empty() {
        // Suffix range: the last N bytes
        let suffix: u64 = end.parse().ok()?;
        (size.saturating_sub(suffix), size.saturating_sub(1))
    } else {
        let start: u64 = start.parse().ok()?;
        let end: u64 = match end {
            "" => size.saturating_sub(1),
            end => end.parse().ok()?,
        };
        (start, end.min(size.saturating_sub(1)))
    };

    (start <= end && start < size).then_some((start, end))
}

#[utoipa::path(
    get,
    path = "/api/recordings/stream/{recording_id}",
    tag = "recordings",
    params(
        ("recording_id" = String, Path, description = "Recording id")
    ),
    responses(
        (
            status = 200,
            content_type = "audio/ogg",
            description = "The recording audio, with HTTP Range support"
        ),
        (status = 404, description = "Recording not found")
    )
)]
pub async fn stream_recording(
    context: ServerContext,
    Path(recording_id): Path<String>,
    headers: HeaderMap,
) -> ServerResult<Response<Body>> {
    let recording = context.station.recordings.get(&recording_id).await?;
    let path = context.station.recordings.file_path(&recording);

    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ServerError::NotFound("Recording file not found".to_string()))?;

    let size = file
        .metadata()
        .await
        .map_err(|e| ServerError::Unknown(e.to_string()))?
        .len();

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, "audio/ogg")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache");

    let response = match parse_range(&headers, size) {
        Some((start, end)) => {
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|e| ServerError::Unknown(e.to_string()))?;

            let length = end - start + 1;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));

            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, length)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{size}"),
                )
                .body(body)
        }
        None => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, size)
            .body(Body::from_stream(ReaderStream::new(file))),
    };

    response.map_err(|e| ServerError::Unknown(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    fn headers(range: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, range.parse().unwrap());
        headers
    }

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(parse_range(&headers("bytes=0-99"), 1000), Some((0, 99)));
        assert_eq!(parse_range(&headers("bytes=500-"), 1000), Some((500, 999)));
        assert_eq!(
            parse_range(&headers("bytes=-100"), 1000),
            Some((900, 999)),
            "a suffix range addresses the file tail"
        );
        assert_eq!(
            parse_range(&headers("bytes=0-5000"), 1000),
            Some((0, 999)),
            "an over-long range is clamped to the file"
        );
    }

    #[test]
    fn test_parse_range_rejects_nonsense() {
        assert_eq!(parse_range(&HeaderMap::new(), 1000), None, "no header");
        assert_eq!(parse_range(&headers("bytes=abc-def"), 1000), None);
        assert_eq!(
            parse_range(&headers("bytes=1000-1001"), 1000),
            None,
            "a range past the end is unsatisfiable"
        );
    }
}
