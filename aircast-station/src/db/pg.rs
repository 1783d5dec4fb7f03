use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, Postgres},
    Error as SqlxError, FromRow, PgPool, QueryBuilder, Row,
};

use super::{
    ConflictProbe, Database, DatabaseError, NewRecording, NewShow, NewWebhook, PrimaryKey,
    RecordingData, RecordingFilter, Result, ShowData, UpdatedWebhook, WebhookData,
};

/// A postgres implementation of the catalog store.
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        Ok(Self { pool })
    }
}

#[derive(FromRow)]
struct ShowRow {
    id: PrimaryKey,
    show_name: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct RecordingRow {
    id: String,
    show_id: Option<PrimaryKey>,
    session_id: String,
    created_at: DateTime<Utc>,
    title: Option<String>,
    artist: Option<String>,
    genre: Option<String>,
    description: Option<String>,
    file_path: String,
    duration_seconds: f64,
}

#[derive(FromRow)]
struct WebhookRow {
    id: String,
    url: String,
    events: Vec<String>,
    signing_key: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ShowRow> for ShowData {
    fn from(row: ShowRow) -> Self {
        Self {
            id: row.id,
            show_name: row.show_name,
            created_at: row.created_at,
        }
    }
}

impl From<RecordingRow> for RecordingData {
    fn from(row: RecordingRow) -> Self {
        Self {
            id: row.id,
            show_id: row.show_id,
            session_id: row.session_id,
            created_at: row.created_at,
            title: row.title,
            artist: row.artist,
            genre: row.genre,
            description: row.description,
            file_path: row.file_path,
            duration_seconds: row.duration_seconds,
        }
    }
}

impl From<WebhookRow> for WebhookData {
    fn from(row: WebhookRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            events: row.events,
            signing_key: row.signing_key,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

const RECORDING_COLUMNS: &str = "recordings.id, recordings.show_id, recordings.session_id, \
    recordings.created_at, recordings.title, recordings.artist, recordings.genre, \
    recordings.description, recordings.file_path, recordings.duration_seconds";

fn push_recording_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &RecordingFilter) {
    builder.push(" WHERE TRUE");

    if let Some(show_name) = &filter.show_name {
        builder
            .push(" AND shows.show_name = ")
            .push_bind(show_name.clone());
    }

    if let Some(genre) = &filter.genre {
        builder.push(" AND recordings.genre = ").push_bind(genre.clone());
    }

    if let Some(date_from) = filter.date_from {
        builder
            .push(" AND recordings.created_at >= ")
            .push_bind(date_from);
    }

    if let Some(date_to) = filter.date_to {
        builder
            .push(" AND recordings.created_at <= ")
            .push_bind(date_to);
    }

    if let Some(search) = &filter.search {
        builder
            .push(" AND recordings.search_text @@ plainto_tsquery('simple', ")
            .push_bind(search.clone())
            .push(")");
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn show_by_id(&self, show_id: PrimaryKey) -> Result<ShowData> {
        sqlx::query_as::<_, ShowRow>("SELECT * FROM shows WHERE id = $1")
            .bind(show_id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("show", &show_id.to_string()))
    }

    async fn show_by_name(&self, show_name: &str) -> Result<ShowData> {
        sqlx::query_as::<_, ShowRow>("SELECT * FROM shows WHERE show_name = $1")
            .bind(show_name)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("show", show_name))
    }

    async fn create_show(&self, new_show: NewShow) -> Result<ShowData> {
        self.show_by_name(&new_show.show_name)
            .await
            .conflict_or_ok("show", "show_name", &new_show.show_name)?;

        sqlx::query_as::<_, ShowRow>(
            "INSERT INTO shows (show_name) VALUES ($1) RETURNING *",
        )
        .bind(&new_show.show_name)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }

    async fn ensure_show(&self, show_name: &str) -> Result<ShowData> {
        match self.show_by_name(show_name).await {
            Err(DatabaseError::NotFound { .. }) => {}
            other => return other,
        }

        match self
            .create_show(NewShow {
                show_name: show_name.to_string(),
            })
            .await
        {
            // Another writer created it in the meantime
            Err(DatabaseError::Conflict { .. }) => self.show_by_name(show_name).await,
            other => other,
        }
    }

    async fn recording_by_id(&self, recording_id: &str) -> Result<RecordingData> {
        sqlx::query_as::<_, RecordingRow>("SELECT * FROM recordings WHERE id = $1")
            .bind(recording_id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("recording", recording_id))
    }

    async fn create_recording(&self, new_recording: NewRecording) -> Result<RecordingData> {
        sqlx::query_as::<_, RecordingRow>(
            "INSERT INTO recordings \
                (id, show_id, session_id, title, artist, genre, description, \
                 file_path, duration_seconds) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING id, show_id, session_id, created_at, title, artist, genre, \
                 description, file_path, duration_seconds",
        )
        .bind(&new_recording.id)
        .bind(new_recording.show_id)
        .bind(&new_recording.session_id)
        .bind(&new_recording.title)
        .bind(&new_recording.artist)
        .bind(&new_recording.genre)
        .bind(&new_recording.description)
        .bind(&new_recording.file_path)
        .bind(new_recording.duration_seconds)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }

    async fn delete_recording(&self, recording_id: &str) -> Result<()> {
        // Ensure the recording exists
        let _ = self.recording_by_id(recording_id).await?;

        sqlx::query("DELETE FROM recordings WHERE id = $1")
            .bind(recording_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn list_recordings(
        &self,
        filter: RecordingFilter,
    ) -> Result<(Vec<RecordingData>, i64)> {
        let mut count_query = QueryBuilder::new(
            "SELECT COUNT(*) FROM recordings LEFT JOIN shows ON recordings.show_id = shows.id",
        );
        push_recording_filters(&mut count_query, &filter);

        let total: i64 = count_query
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.any())?
            .get(0);

        let mut page_query = QueryBuilder::new(format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings \
             LEFT JOIN shows ON recordings.show_id = shows.id"
        ));
        push_recording_filters(&mut page_query, &filter);
        page_query
            .push(" ORDER BY recordings.created_at DESC OFFSET ")
            .push_bind(filter.offset)
            .push(" LIMIT ")
            .push_bind(filter.limit);

        let recordings = page_query
            .build_query_as::<RecordingRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok((recordings, total))
    }

    async fn webhook_by_id(&self, webhook_id: &str) -> Result<WebhookData> {
        sqlx::query_as::<_, WebhookRow>("SELECT * FROM webhooks WHERE id = $1")
            .bind(webhook_id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("webhook", webhook_id))
    }

    async fn webhook_by_url_and_events(
        &self,
        url: &str,
        events: &[String],
    ) -> Result<WebhookData> {
        sqlx::query_as::<_, WebhookRow>(
            "SELECT * FROM webhooks WHERE url = $1 AND events = $2",
        )
        .bind(url)
        .bind(events)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.not_found_or("webhook", url))
    }

    async fn create_webhook(&self, new_webhook: NewWebhook) -> Result<WebhookData> {
        self.webhook_by_url_and_events(&new_webhook.url, &new_webhook.events)
            .await
            .conflict_or_ok("webhook", "url and events", &new_webhook.url)?;

        sqlx::query_as::<_, WebhookRow>(
            "INSERT INTO webhooks (id, url, events, signing_key, description) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(&new_webhook.id)
        .bind(&new_webhook.url)
        .bind(&new_webhook.events)
        .bind(&new_webhook.signing_key)
        .bind(&new_webhook.description)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }

    async fn update_webhook(&self, updated: UpdatedWebhook) -> Result<WebhookData> {
        sqlx::query_as::<_, WebhookRow>(
            "UPDATE webhooks SET signing_key = $1, description = $2 \
             WHERE id = $3 RETURNING *",
        )
        .bind(&updated.signing_key)
        .bind(&updated.description)
        .bind(&updated.id)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.not_found_or("webhook", &updated.id))
    }

    async fn delete_webhook(&self, webhook_id: &str) -> Result<()> {
        // Ensure the webhook exists
        let _ = self.webhook_by_id(webhook_id).await?;

        sqlx::query("DELETE FROM webhooks WHERE id = $1")
            .bind(webhook_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookData>> {
        sqlx::query_as::<_, WebhookRow>("SELECT * FROM webhooks ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map(|rows| rows.into_iter().map(Into::into).collect())
            .map_err(|e| e.any())
    }

    async fn webhooks_for_event(&self, event_type: &str) -> Result<Vec<WebhookData>> {
        sqlx::query_as::<_, WebhookRow>("SELECT * FROM webhooks WHERE $1 = ANY(events)")
            .bind(event_type)
            .fetch_all(&self.pool)
            .await
            .map(|rows| rows.into_iter().map(Into::into).collect())
            .map_err(|e| e.any())
    }
}

trait IntoDatabaseError {
    fn any(self) -> DatabaseError;
    fn not_found_or(self, resource: &str, identifier: &str) -> DatabaseError;
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &str, identifier: &str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource: resource.to_string(),
                identifier: identifier.to_string(),
            },
            e => e.any(),
        }
    }
}
