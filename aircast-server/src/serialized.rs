//! All shapes that are exposed from endpoints are defined here along with
//! the conversions that produce them.

use serde::Serialize;
use utoipa::ToSchema;

use aircast_station::{
    db::WebhookData, AuthDecision, CatalogEntry, DeliveryRecord, DeliveryStats, NowPlaying,
    SongEntry,
};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SongItem {
    pub song_id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub queue: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SongAdded {
    pub song_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Success {
    pub success: bool,
}

impl Success {
    pub fn new() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenCreated {
    pub token: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LivestreamTokenCreated {
    pub token: String,
    pub expires_at: String,
    pub max_streaming_seconds: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Webhook {
    pub webhook_id: String,
    pub url: String,
    pub events: Vec<String>,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookDelivery {
    pub timestamp: String,
    pub event_type: String,
    pub url: String,
    pub status: String,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookStats {
    pub total_deliveries: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    pub last_delivery: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookTestResult {
    pub status: String,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NowPlayingItem {
    pub source: String,
    pub metadata: NowPlayingMetadata,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NowPlayingMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RecordingItem {
    pub id: String,
    pub created_at: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub duration_seconds: f64,
    pub stream_url: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ShowRecordings {
    pub show_name: String,
    pub recordings: Vec<RecordingItem>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RecordingsList {
    pub shows: Vec<ShowRecordings>,
    pub total_shows: usize,
    pub total_recordings: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LivestreamAuthResult {
    pub accept: bool,
    pub reason: Option<String>,
    pub session_id: Option<String>,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<SongItem> for SongEntry {
    fn to_serialized(&self) -> SongItem {
        SongItem {
            song_id: self.song_id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            queue: self.queue.to_string(),
        }
    }
}

impl ToSerialized<Webhook> for WebhookData {
    fn to_serialized(&self) -> Webhook {
        Webhook {
            webhook_id: self.id.clone(),
            url: self.url.clone(),
            events: self.events.clone(),
            description: self.description.clone(),
            // The signing key is deliberately absent
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

impl ToSerialized<WebhookDelivery> for DeliveryRecord {
    fn to_serialized(&self) -> WebhookDelivery {
        WebhookDelivery {
            timestamp: self.timestamp.to_rfc3339(),
            event_type: self.event_type.clone(),
            url: self.url.clone(),
            status: status_name(self),
            status_code: self.status_code,
            error: self.error.clone(),
            latency_ms: self.latency_ms,
        }
    }
}

impl ToSerialized<WebhookStats> for DeliveryStats {
    fn to_serialized(&self) -> WebhookStats {
        WebhookStats {
            total_deliveries: self.total_deliveries,
            success_count: self.success_count,
            failure_count: self.failure_count,
            success_rate: self.success_rate,
            last_delivery: self.last_delivery.map(|t| t.to_rfc3339()),
        }
    }
}

impl ToSerialized<WebhookTestResult> for DeliveryRecord {
    fn to_serialized(&self) -> WebhookTestResult {
        WebhookTestResult {
            status: status_name(self),
            status_code: self.status_code,
            latency_ms: self.latency_ms,
            error: self.error.clone(),
        }
    }
}

impl ToSerialized<NowPlayingItem> for NowPlaying {
    fn to_serialized(&self) -> NowPlayingItem {
        NowPlayingItem {
            source: self.source.to_string(),
            metadata: NowPlayingMetadata {
                title: self.metadata.title.clone(),
                artist: self.metadata.artist.clone(),
                genre: self.metadata.genre.clone(),
                description: self.metadata.description.clone(),
            },
        }
    }
}

impl ToSerialized<RecordingItem> for CatalogEntry {
    fn to_serialized(&self) -> RecordingItem {
        RecordingItem {
            id: self.recording.id.clone(),
            created_at: self.recording.created_at.to_rfc3339(),
            title: self.recording.title.clone(),
            artist: self.recording.artist.clone(),
            genre: self.recording.genre.clone(),
            description: self.recording.description.clone(),
            duration_seconds: self.recording.duration_seconds,
            stream_url: format!("/api/recordings/stream/{}", self.recording.id),
        }
    }
}

impl ToSerialized<LivestreamAuthResult> for AuthDecision {
    fn to_serialized(&self) -> LivestreamAuthResult {
        LivestreamAuthResult {
            accept: self.accept,
            reason: self.reason.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

fn status_name(record: &DeliveryRecord) -> String {
    match record.status {
        aircast_station::DeliveryStatus::Success => "success".to_string(),
        aircast_station::DeliveryStatus::Failed => "failed".to_string(),
    }
}
