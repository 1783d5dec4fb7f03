use chrono::{DateTime, Utc};

pub type PrimaryKey = i64;

#[derive(Debug, Clone)]
pub struct ShowData {
    pub id: PrimaryKey,
    pub show_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RecordingData {
    pub id: String,
    pub show_id: Option<PrimaryKey>,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub file_path: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct WebhookData {
    pub id: String,
    pub url: String,
    pub events: Vec<String>,
    /// Never serialized back to callers
    pub signing_key: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewShow {
    pub show_name: String,
}

#[derive(Debug)]
pub struct NewRecording {
    pub id: String,
    pub show_id: Option<PrimaryKey>,
    pub session_id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub file_path: String,
    pub duration_seconds: f64,
}

#[derive(Debug)]
pub struct NewWebhook {
    pub id: String,
    pub url: String,
    /// Kept sorted so the subscription identity is order-independent
    pub events: Vec<String>,
    pub signing_key: String,
    pub description: Option<String>,
}

#[derive(Debug)]
pub struct UpdatedWebhook {
    pub id: String,
    pub signing_key: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct RecordingFilter {
    pub show_name: Option<String>,
    /// Full-text search over title, artist, genre and description
    pub search: Option<String>,
    pub genre: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub offset: i64,
    pub limit: i64,
}
