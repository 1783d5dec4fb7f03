use chrono::Utc;
use parking_lot::Mutex;

use async_trait::async_trait;

use super::{
    Database, DatabaseError, NewRecording, NewShow, NewWebhook, PrimaryKey, RecordingData,
    RecordingFilter, Result, ShowData, UpdatedWebhook, WebhookData,
};

/// An in-memory catalog, used by tests.
#[derive(Default)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    shows: Vec<ShowData>,
    recordings: Vec<RecordingData>,
    webhooks: Vec<WebhookData>,
    next_show_id: PrimaryKey,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(resource: &str, identifier: &str) -> DatabaseError {
    DatabaseError::NotFound {
        resource: resource.to_string(),
        identifier: identifier.to_string(),
    }
}

fn matches_search(recording: &RecordingData, search: &str) -> bool {
    let haystack = [
        recording.title.as_deref(),
        recording.artist.as_deref(),
        recording.genre.as_deref(),
        recording.description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase();

    // Whitespace/punctuation tokenization, every term must appear
    search
        .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|term| !term.is_empty())
        .all(|term| haystack.contains(&term.to_lowercase()))
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn show_by_id(&self, show_id: PrimaryKey) -> Result<ShowData> {
        self.inner
            .lock()
            .shows
            .iter()
            .find(|s| s.id == show_id)
            .cloned()
            .ok_or_else(|| not_found("show", &show_id.to_string()))
    }

    async fn show_by_name(&self, show_name: &str) -> Result<ShowData> {
        self.inner
            .lock()
            .shows
            .iter()
            .find(|s| s.show_name == show_name)
            .cloned()
            .ok_or_else(|| not_found("show", show_name))
    }

    async fn create_show(&self, new_show: NewShow) -> Result<ShowData> {
        let mut inner = self.inner.lock();

        if inner.shows.iter().any(|s| s.show_name == new_show.show_name) {
            return Err(DatabaseError::Conflict {
                resource: "show".to_string(),
                field: "show_name".to_string(),
                value: new_show.show_name,
            });
        }

        inner.next_show_id += 1;
        let show = ShowData {
            id: inner.next_show_id,
            show_name: new_show.show_name,
            created_at: Utc::now(),
        };

        inner.shows.push(show.clone());
        Ok(show)
    }

    async fn ensure_show(&self, show_name: &str) -> Result<ShowData> {
        match self.show_by_name(show_name).await {
            Err(DatabaseError::NotFound { .. }) => {
                self.create_show(NewShow {
                    show_name: show_name.to_string(),
                })
                .await
            }
            other => other,
        }
    }

    async fn recording_by_id(&self, recording_id: &str) -> Result<RecordingData> {
        self.inner
            .lock()
            .recordings
            .iter()
            .find(|r| r.id == recording_id)
            .cloned()
            .ok_or_else(|| not_found("recording", recording_id))
    }

    async fn create_recording(&self, new_recording: NewRecording) -> Result<RecordingData> {
        let recording = RecordingData {
            id: new_recording.id,
            show_id: new_recording.show_id,
            session_id: new_recording.session_id,
            created_at: Utc::now(),
            title: new_recording.title,
            artist: new_recording.artist,
            genre: new_recording.genre,
            description: new_recording.description,
            file_path: new_recording.file_path,
            duration_seconds: new_recording.duration_seconds,
        };

        self.inner.lock().recordings.push(recording.clone());
        Ok(recording)
    }

    async fn delete_recording(&self, recording_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let before = inner.recordings.len();

        inner.recordings.retain(|r| r.id != recording_id);

        if inner.recordings.len() == before {
            return Err(not_found("recording", recording_id));
        }

        Ok(())
    }

    async fn list_recordings(
        &self,
        filter: RecordingFilter,
    ) -> Result<(Vec<RecordingData>, i64)> {
        let inner = self.inner.lock();

        let show_id = filter
            .show_name
            .as_ref()
            .map(|name| inner.shows.iter().find(|s| &s.show_name == name))
            .map(|show| show.map(|s| s.id));

        let mut matching: Vec<_> = inner
            .recordings
            .iter()
            .filter(|r| match &show_id {
                Some(Some(id)) => r.show_id == Some(*id),
                // The named show doesn't exist
                Some(None) => false,
                None => true,
            })
            .filter(|r| {
                filter
                    .genre
                    .as_ref()
                    .map_or(true, |genre| r.genre.as_deref() == Some(genre))
            })
            .filter(|r| filter.date_from.map_or(true, |from| r.created_at >= from))
            .filter(|r| filter.date_to.map_or(true, |to| r.created_at <= to))
            .filter(|r| {
                filter
                    .search
                    .as_ref()
                    .map_or(true, |search| matches_search(r, search))
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();

        Ok((page, total))
    }

    async fn webhook_by_id(&self, webhook_id: &str) -> Result<WebhookData> {
        self.inner
            .lock()
            .webhooks
            .iter()
            .find(|w| w.id == webhook_id)
            .cloned()
            .ok_or_else(|| not_found("webhook", webhook_id))
    }

    async fn webhook_by_url_and_events(
        &self,
        url: &str,
        events: &[String],
    ) -> Result<WebhookData> {
        self.inner
            .lock()
            .webhooks
            .iter()
            .find(|w| w.url == url && w.events == events)
            .cloned()
            .ok_or_else(|| not_found("webhook", url))
    }

    async fn create_webhook(&self, new_webhook: NewWebhook) -> Result<WebhookData> {
        let mut inner = self.inner.lock();

        if inner
            .webhooks
            .iter()
            .any(|w| w.url == new_webhook.url && w.events == new_webhook.events)
        {
            return Err(DatabaseError::Conflict {
                resource: "webhook".to_string(),
                field: "url and events".to_string(),
                value: new_webhook.url,
            });
        }

        let webhook = WebhookData {
            id: new_webhook.id,
            url: new_webhook.url,
            events: new_webhook.events,
            signing_key: new_webhook.signing_key,
            description: new_webhook.description,
            created_at: Utc::now(),
        };

        inner.webhooks.push(webhook.clone());
        Ok(webhook)
    }

    async fn update_webhook(&self, updated: UpdatedWebhook) -> Result<WebhookData> {
        let mut inner = self.inner.lock();

        let webhook = inner
            .webhooks
            .iter_mut()
            .find(|w| w.id == updated.id)
            .ok_or_else(|| not_found("webhook", &updated.id))?;

        webhook.signing_key = updated.signing_key;
        webhook.description = updated.description;

        Ok(webhook.clone())
    }

    async fn delete_webhook(&self, webhook_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let before = inner.webhooks.len();

        inner.webhooks.retain(|w| w.id != webhook_id);

        if inner.webhooks.len() == before {
            return Err(not_found("webhook", webhook_id));
        }

        Ok(())
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookData>> {
        Ok(self.inner.lock().webhooks.clone())
    }

    async fn webhooks_for_event(&self, event_type: &str) -> Result<Vec<WebhookData>> {
        Ok(self
            .inner
            .lock()
            .webhooks
            .iter()
            .filter(|w| w.events.iter().any(|e| e == event_type))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_show_names_are_unique() {
        let db = MemoryDatabase::new();

        db.create_show(NewShow {
            show_name: "morning".to_string(),
        })
        .await
        .unwrap();

        let duplicate = db
            .create_show(NewShow {
                show_name: "morning".to_string(),
            })
            .await;

        assert!(
            matches!(duplicate, Err(DatabaseError::Conflict { .. })),
            "a second show with the same name should conflict"
        );
    }

    #[tokio::test]
    async fn test_ensure_show_creates_once() {
        let db = MemoryDatabase::new();

        let first = db.ensure_show("late night").await.unwrap();
        let second = db.ensure_show("late night").await.unwrap();

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_recording_search_tokenizes_terms() {
        let db = MemoryDatabase::new();

        db.create_recording(NewRecording {
            id: "r1".to_string(),
            show_id: None,
            session_id: "s1".to_string(),
            title: Some("Deep House Special".to_string()),
            artist: Some("DJ Example".to_string()),
            genre: Some("house".to_string()),
            description: None,
            file_path: "r1.ogg".to_string(),
            duration_seconds: 1800.0,
        })
        .await
        .unwrap();

        let (hits, total) = db
            .list_recordings(RecordingFilter {
                search: Some("house, example".to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(total, 1, "all terms match across fields");
        assert_eq!(hits[0].id, "r1");

        let (_, misses) = db
            .list_recordings(RecordingFilter {
                search: Some("house techno".to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(misses, 0, "a non-matching term should exclude the row");
    }
}
