use async_trait::async_trait;
use thiserror::Error;

mod data;
mod memory;
mod pg;

pub use data::*;
pub use memory::*;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        resource: String,
        field: String,
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: String,
        identifier: String,
    },
}

/// Represents a type that can fetch and persist catalog data.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    async fn show_by_id(&self, show_id: PrimaryKey) -> Result<ShowData>;
    async fn show_by_name(&self, show_name: &str) -> Result<ShowData>;
    async fn create_show(&self, new_show: NewShow) -> Result<ShowData>;
    /// Returns the show with the given name, creating it on first use.
    async fn ensure_show(&self, show_name: &str) -> Result<ShowData>;

    async fn recording_by_id(&self, recording_id: &str) -> Result<RecordingData>;
    async fn create_recording(&self, new_recording: NewRecording) -> Result<RecordingData>;
    async fn delete_recording(&self, recording_id: &str) -> Result<()>;
    /// Filtered, paginated listing. Returns the page and the total count of
    /// matching recordings.
    async fn list_recordings(
        &self,
        filter: RecordingFilter,
    ) -> Result<(Vec<RecordingData>, i64)>;

    async fn webhook_by_id(&self, webhook_id: &str) -> Result<WebhookData>;
    /// Matches a subscription on its identity, `(url, sorted events)`.
    async fn webhook_by_url_and_events(
        &self,
        url: &str,
        events: &[String],
    ) -> Result<WebhookData>;
    async fn create_webhook(&self, new_webhook: NewWebhook) -> Result<WebhookData>;
    /// Replaces the signing key and description of an existing subscription,
    /// preserving its id and creation time.
    async fn update_webhook(&self, updated: UpdatedWebhook) -> Result<WebhookData>;
    async fn delete_webhook(&self, webhook_id: &str) -> Result<()>;
    async fn list_webhooks(&self) -> Result<Vec<WebhookData>>;
    async fn webhooks_for_event(&self, event_type: &str) -> Result<Vec<WebhookData>>;
}

/// Helper trait for mapping "already exists" probes the way callers expect.
pub trait ConflictProbe<T> {
    fn conflict_or_ok(self, resource: &str, field: &str, value: &str) -> Result<()>;
}

impl<T> ConflictProbe<T> for Result<T> {
    fn conflict_or_ok(self, resource: &str, field: &str, value: &str) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource: resource.to_string(),
                field: field.to_string(),
                value: value.to_string(),
            }),
            Err(DatabaseError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
