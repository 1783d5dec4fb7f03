use std::{fmt, str::FromStr, sync::Arc};

use chrono::Utc;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::store::{StateStore, Subscription};

/// The audio source the mixer is currently playing from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Livestream,
    User,
    Fallback,
}

/// One of the two queues the mixer consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    User,
    Fallback,
}

/// Why a live session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectReason {
    /// The broadcaster hung up
    Client,
    /// The watchdog enforced the streaming time limit
    Limit,
    /// An admin kicked the session
    Admin,
}

/// Tag metadata of whatever is currently audible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Livestream => "livestream",
            Self::User => "user",
            Self::Fallback => "fallback",
        }
    }
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Fallback => "fallback",
        }
    }

    pub fn as_source(&self) -> Source {
        match self {
            Self::User => Source::User,
            Self::Fallback => Source::Fallback,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongChangedData {
    pub source: Source,
    pub song_id: Option<String>,
    pub metadata: SourceMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSwitchedData {
    pub from: Source,
    pub to: Source,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivestreamStartedData {
    pub principal_id: String,
    pub session_id: String,
    pub show_name: Option<String>,
    pub min_recording_duration: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivestreamEndedData {
    pub principal_id: String,
    pub session_id: String,
    pub duration_seconds: u64,
    pub reason: DisconnectReason,
}

/// Describes the events observed by the control plane.
#[derive(Debug, Clone)]
pub enum Event {
    /// The audible song changed on some source.
    SongChanged(SongChangedData),
    /// The active source switched between livestream, user and fallback.
    QueueSwitched(QueueSwitchedData),
    /// A live session was confirmed on air.
    LivestreamStarted(LivestreamStartedData),
    /// A live session ended, by hangup or enforcement.
    LivestreamEnded(LivestreamEndedData),
}

/// The names events are published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    SongChanged,
    QueueSwitched,
    LivestreamStarted,
    LivestreamEnded,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::SongChanged,
        EventType::QueueSwitched,
        EventType::LivestreamStarted,
        EventType::LivestreamEnded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SongChanged => "song_changed",
            Self::QueueSwitched => "queue_switched",
            Self::LivestreamStarted => "livestream_started",
            Self::LivestreamEnded => "livestream_ended",
        }
    }

    /// The pub/sub channel this event type is published on.
    pub fn channel(&self) -> String {
        format!("events:{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "song_changed" => Ok(Self::SongChanged),
            "queue_switched" => Ok(Self::QueueSwitched),
            "livestream_started" => Ok(Self::LivestreamStarted),
            "livestream_ended" => Ok(Self::LivestreamEnded),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The envelope every event is published and delivered in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_type: String,
    pub description: String,
    pub data: serde_json::Value,
    /// ISO-8601 UTC, assigned at publish
    pub timestamp: String,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::SongChanged(_) => EventType::SongChanged,
            Self::QueueSwitched(_) => EventType::QueueSwitched,
            Self::LivestreamStarted(_) => EventType::LivestreamStarted,
            Self::LivestreamEnded(_) => EventType::LivestreamEnded,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::SongChanged(data) => match (&data.metadata.title, &data.metadata.artist) {
                (Some(title), Some(artist)) => format!("Playing next: {title} by {artist}"),
                (Some(title), None) => format!("Playing next: {title}"),
                _ => format!("Song changed on the {} source", data.source),
            },
            Self::QueueSwitched(data) => format!("Switched from {} to {}", data.from, data.to),
            Self::LivestreamStarted(_) => "A livestream was started".to_string(),
            Self::LivestreamEnded(data) => {
                format!("Livestream ended after {} seconds", data.duration_seconds)
            }
        }
    }

    pub fn data(&self) -> serde_json::Value {
        let serialized = match self {
            Self::SongChanged(data) => serde_json::to_value(data),
            Self::QueueSwitched(data) => serde_json::to_value(data),
            Self::LivestreamStarted(data) => serde_json::to_value(data),
            Self::LivestreamEnded(data) => serde_json::to_value(data),
        };

        serialized.unwrap_or(serde_json::Value::Null)
    }

    /// Wraps the event in its envelope, stamping the publish time.
    pub fn envelope(&self) -> Envelope {
        Envelope {
            event_type: self.event_type().as_str().to_string(),
            description: self.description(),
            data: self.data(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn log(&self) {
        match self {
            Self::SongChanged(data) => {
                debug!("Song changed on {}: {:?}", data.source, data.metadata.title)
            }
            Self::QueueSwitched(data) => info!("Source switched {} -> {}", data.from, data.to),
            Self::LivestreamStarted(data) => info!(
                "Livestream started by {} (session {})",
                data.principal_id, data.session_id
            ),
            Self::LivestreamEnded(data) => info!(
                "Livestream of {} ended after {}s ({:?})",
                data.principal_id, data.duration_seconds, data.reason
            ),
        }
    }
}

/// Typed publish/subscribe over the state store's pub/sub channels.
///
/// Publishing is fire-and-forget: failures are logged, never surfaced, and
/// publishers are never blocked by slow subscribers.
pub struct EventBus<S> {
    store: Arc<S>,
}

impl<S> EventBus<S>
where
    S: StateStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn publish(&self, event: Event) {
        event.log();

        let envelope = event.envelope();
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize {} event: {e}", envelope.event_type);
                return;
            }
        };

        let channel = event.event_type().channel();

        if let Err(e) = self.store.publish(&channel, &payload).await {
            error!("Failed to publish {} event: {e}", envelope.event_type);
        }
    }

    /// Subscribes to the given event types.
    pub async fn subscribe(
        &self,
        types: &[EventType],
    ) -> Result<Subscription, crate::store::StoreError> {
        let channels: Vec<_> = types.iter().map(|t| t.channel()).collect();
        self.store.subscribe(&channels).await
    }

    /// Subscribes to every event channel.
    pub async fn subscribe_all(&self) -> Result<Subscription, crate::store::StoreError> {
        self.subscribe(&EventType::ALL).await
    }
}

impl<S> Clone for EventBus<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_publish_wraps_event_in_envelope() {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new(store.clone());

        let mut subscription = bus.subscribe_all().await.unwrap();

        bus.publish(Event::QueueSwitched(QueueSwitchedData {
            from: Source::Fallback,
            to: Source::User,
        }))
        .await;

        let message = subscription.next_message().await.unwrap();
        assert_eq!(message.channel, "events:queue_switched");

        let envelope: Envelope = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(envelope.event_type, "queue_switched");
        assert_eq!(envelope.data["from"], "fallback");
        assert_eq!(envelope.data["to"], "user");
        assert!(
            !envelope.timestamp.is_empty(),
            "timestamp should be assigned at publish"
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let bus = EventBus::new(Arc::new(MemoryStore::new()));

        bus.publish(Event::LivestreamEnded(LivestreamEndedData {
            principal_id: "dj".to_string(),
            session_id: "s1".to_string(),
            duration_seconds: 12,
            reason: DisconnectReason::Client,
        }))
        .await;
    }
}
