use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::{error, info};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use aircast_core::{
    store::{StateStore, StoreError},
    to_canonical_json, Config, Envelope, EventType,
};

use crate::{
    db::{Database, DatabaseError, NewWebhook, UpdatedWebhook, WebhookData},
    StationContext,
};

mod dispatcher;

pub use dispatcher::*;

type HmacSha256 = Hmac<Sha256>;

/// Signing keys shorter than this are refused.
pub const MIN_SIGNING_KEY_LENGTH: usize = 16;

/// Delivery history per subscription: the last 100 entries within 7 days,
/// whichever is tighter.
const DELIVERY_LOG_LIMIT: usize = 100;
const DELIVERY_RETENTION: Duration = Duration::from_secs(7 * 86400);

type Result<T> = std::result::Result<T, WebhookError>;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Signing key must be at least {MIN_SIGNING_KEY_LENGTH} characters")]
    WeakSigningKey,
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),
    #[error("At least one event type is required")]
    NoEvents,
    #[error("{0} is not a usable webhook URL")]
    InvalidUrl(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct NewSubscription {
    pub url: String,
    pub events: Vec<String>,
    pub signing_key: String,
    pub description: Option<String>,
}

/// One recorded delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub url: String,
    pub status: DeliveryStatus,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStats {
    pub total_deliveries: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    pub last_delivery: Option<DateTime<Utc>>,
}

/// Computes the webhook signature over a canonical-JSON body.
pub fn sign_payload(signing_key: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body.as_bytes());

    hex::encode(mac.finalize().into_bytes())
}

/// Serializes an envelope in the contractual signing form: JSON with keys
/// sorted at every nesting level.
pub fn canonical_body(envelope: &Envelope) -> String {
    let value = serde_json::to_value(envelope).unwrap_or(serde_json::Value::Null);
    to_canonical_json(&value)
}

/// Manages webhook subscriptions and their delivery history.
pub struct WebhookManager<S, Db> {
    context: StationContext<S, Db>,
    client: reqwest::Client,
}

impl<S, Db> WebhookManager<S, Db>
where
    S: StateStore,
    Db: Database,
{
    pub fn new(context: &StationContext<S, Db>) -> Self {
        Self {
            context: context.clone(),
            client: reqwest::Client::builder()
                .timeout(Config::WEBHOOK_TIMEOUT)
                .build()
                .expect("HTTP client is built"),
        }
    }

    /// Registers a subscription. Idempotent on `(url, events)`: repeating a
    /// registration updates the signing key and description while keeping
    /// the id and creation time.
    pub async fn subscribe(&self, new: NewSubscription) -> Result<WebhookData> {
        if new.signing_key.len() < MIN_SIGNING_KEY_LENGTH {
            return Err(WebhookError::WeakSigningKey);
        }

        if new.events.is_empty() {
            return Err(WebhookError::NoEvents);
        }

        for event in &new.events {
            if event.parse::<EventType>().is_err() {
                return Err(WebhookError::UnknownEvent(event.clone()));
            }
        }

        let parsed = new
            .url
            .parse::<reqwest::Url>()
            .map_err(|_| WebhookError::InvalidUrl(new.url.clone()))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(WebhookError::InvalidUrl(new.url));
        }

        let mut events = new.events;
        events.sort();
        events.dedup();

        let database = &self.context.database;

        match database.webhook_by_url_and_events(&new.url, &events).await {
            Ok(existing) => {
                let updated = database
                    .update_webhook(UpdatedWebhook {
                        id: existing.id.clone(),
                        signing_key: new.signing_key,
                        description: new.description,
                    })
                    .await?;

                info!("Updated existing webhook {} for {:?}", updated.id, events);
                Ok(updated)
            }
            Err(DatabaseError::NotFound { .. }) => {
                let created = database
                    .create_webhook(NewWebhook {
                        id: Uuid::new_v4().to_string(),
                        url: new.url,
                        events,
                        signing_key: new.signing_key,
                        description: new.description,
                    })
                    .await?;

                info!(
                    "Created webhook subscription {} for {:?}",
                    created.id, created.events
                );
                Ok(created)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self) -> Result<Vec<WebhookData>> {
        Ok(self.context.database.list_webhooks().await?)
    }

    pub async fn get(&self, webhook_id: &str) -> Result<WebhookData> {
        Ok(self.context.database.webhook_by_id(webhook_id).await?)
    }

    pub async fn delete(&self, webhook_id: &str) -> Result<()> {
        self.context.database.delete_webhook(webhook_id).await?;
        self.context
            .store
            .del(&format!("webhook:deliveries:{webhook_id}"))
            .await?;

        info!("Deleted webhook subscription {webhook_id}");
        Ok(())
    }

    /// The retained delivery history, newest first.
    pub async fn deliveries(&self, webhook_id: &str) -> Result<Vec<DeliveryRecord>> {
        // Ensure the webhook exists
        let _ = self.get(webhook_id).await?;

        let horizon = Utc::now()
            - chrono::Duration::from_std(DELIVERY_RETENTION).unwrap_or(chrono::Duration::zero());

        let records = self
            .context
            .store
            .list_range(&format!("webhook:deliveries:{webhook_id}"))
            .await?
            .into_iter()
            .filter_map(|raw| serde_json::from_str::<DeliveryRecord>(&raw).ok())
            .filter(|record| record.timestamp >= horizon)
            .collect();

        Ok(records)
    }

    pub async fn stats(&self, webhook_id: &str) -> Result<DeliveryStats> {
        let deliveries = self.deliveries(webhook_id).await?;

        let total_deliveries = deliveries.len();
        let success_count = deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::Success)
            .count();
        let failure_count = total_deliveries - success_count;

        Ok(DeliveryStats {
            total_deliveries,
            success_count,
            failure_count,
            success_rate: if total_deliveries > 0 {
                success_count as f64 / total_deliveries as f64
            } else {
                0.0
            },
            last_delivery: deliveries.first().map(|d| d.timestamp),
        })
    }

    /// Delivers an envelope to one subscription: canonical body, HMAC
    /// signature, hard timeout, one attempt. The outcome is recorded either
    /// way; consumers are expected to be idempotent.
    pub async fn deliver(&self, webhook: &WebhookData, envelope: &Envelope) -> DeliveryRecord {
        let body = canonical_body(envelope);
        let signature = sign_payload(&webhook.signing_key, &body);

        let started = std::time::Instant::now();

        let response = self
            .client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", format!("sha256={signature}"))
            .header("X-Webhook-Timestamp", &envelope.timestamp)
            .body(body)
            .send()
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;

        let record = match response {
            Ok(response) if response.status().is_success() => DeliveryRecord {
                timestamp: Utc::now(),
                event_type: envelope.event_type.clone(),
                url: webhook.url.clone(),
                status: DeliveryStatus::Success,
                status_code: Some(response.status().as_u16()),
                error: None,
                latency_ms,
            },
            Ok(response) => DeliveryRecord {
                timestamp: Utc::now(),
                event_type: envelope.event_type.clone(),
                url: webhook.url.clone(),
                status: DeliveryStatus::Failed,
                status_code: Some(response.status().as_u16()),
                error: Some(format!("HTTP {}", response.status())),
                latency_ms,
            },
            Err(e) => DeliveryRecord {
                timestamp: Utc::now(),
                event_type: envelope.event_type.clone(),
                url: webhook.url.clone(),
                status: DeliveryStatus::Failed,
                status_code: None,
                error: Some(if e.is_timeout() {
                    "Request timeout (5s)".to_string()
                } else {
                    e.to_string()
                }),
                latency_ms,
            },
        };

        if let Err(e) = self.record_delivery(&webhook.id, &record).await {
            error!("Failed to record delivery for {}: {e}", webhook.id);
        }

        match &record.error {
            None => info!(
                "Webhook {} delivered to {} ({}ms)",
                webhook.id, webhook.url, latency_ms
            ),
            Some(reason) => error!("Webhook {} delivery failed: {reason}", webhook.id),
        }

        record
    }

    /// Synchronously delivers a `webhook_test` envelope, reporting the
    /// outcome to the caller.
    pub async fn test(&self, webhook_id: &str) -> Result<DeliveryRecord> {
        let webhook = self.get(webhook_id).await?;

        let envelope = Envelope {
            event_type: "webhook_test".to_string(),
            description: "Test webhook delivery".to_string(),
            data: serde_json::json!({ "test": true, "webhook_id": webhook_id }),
            timestamp: Utc::now().to_rfc3339(),
        };

        Ok(self.deliver(&webhook, &envelope).await)
    }

    async fn record_delivery(&self, webhook_id: &str, record: &DeliveryRecord) -> Result<()> {
        let key = format!("webhook:deliveries:{webhook_id}");
        let payload = serde_json::to_string(record)
            .map_err(|e| StoreError::Unavailable(Box::new(e)))?;

        self.context
            .store
            .list_push(&key, &payload, DELIVERY_LOG_LIMIT)
            .await?;
        self.context.store.expire(&key, DELIVERY_RETENTION).await?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{test_station, TestMediaTools};

    fn subscription(url: &str) -> NewSubscription {
        NewSubscription {
            url: url.to_string(),
            events: vec!["song_changed".to_string()],
            signing_key: "k".repeat(16),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_subscription_validation() {
        let station = test_station(TestMediaTools::new(180.0));
        let webhooks = WebhookManager::new(&station.context);

        let weak = webhooks
            .subscribe(NewSubscription {
                signing_key: "short".to_string(),
                ..subscription("https://example.com/hook")
            })
            .await;
        assert!(matches!(weak, Err(WebhookError::WeakSigningKey)));

        let unknown = webhooks
            .subscribe(NewSubscription {
                events: vec!["volcano_erupted".to_string()],
                ..subscription("https://example.com/hook")
            })
            .await;
        assert!(matches!(unknown, Err(WebhookError::UnknownEvent(_))));

        let bad_url = webhooks
            .subscribe(subscription("ftp://example.com/hook"))
            .await;
        assert!(matches!(bad_url, Err(WebhookError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_repeat_registration_preserves_identity() {
        let station = test_station(TestMediaTools::new(180.0));
        let webhooks = WebhookManager::new(&station.context);

        let first = webhooks
            .subscribe(subscription("https://example.com/hook"))
            .await
            .unwrap();

        let second = webhooks
            .subscribe(NewSubscription {
                signing_key: "x".repeat(32),
                description: Some("rotated".to_string()),
                ..subscription("https://example.com/hook")
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id, "the webhook id should be stable");
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.signing_key, "x".repeat(32));
        assert_eq!(second.description.as_deref(), Some("rotated"));

        assert_eq!(webhooks.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_signature_round_trip() {
        let envelope = Envelope {
            event_type: "song_changed".to_string(),
            description: "test".to_string(),
            data: serde_json::json!({ "zulu": 1, "alpha": { "b": 2, "a": 1 } }),
            timestamp: "2026-08-02T12:00:00Z".to_string(),
        };

        let key = "k".repeat(16);
        let body = canonical_body(&envelope);
        let signature = sign_payload(&key, &body);

        // A consumer recomputing over the body bytes gets the same result
        assert_eq!(signature, sign_payload(&key, &body));
        assert_eq!(signature.len(), 64);

        // The body is canonical: keys sorted at every level
        let alpha = body.find("\"alpha\"").unwrap();
        let zulu = body.find("\"zulu\"").unwrap();
        assert!(alpha < zulu, "data keys should be sorted in the body");

        // A different key yields a different signature
        assert_ne!(signature, sign_payload(&"m".repeat(16), &body));
    }

    #[tokio::test]
    async fn test_delivery_history_is_bounded_and_aggregated() {
        let station = test_station(TestMediaTools::new(180.0));
        let webhooks = WebhookManager::new(&station.context);

        let webhook = webhooks
            .subscribe(subscription("https://example.com/hook"))
            .await
            .unwrap();

        for n in 0..110 {
            let record = DeliveryRecord {
                timestamp: Utc::now(),
                event_type: "song_changed".to_string(),
                url: webhook.url.clone(),
                status: if n % 2 == 0 {
                    DeliveryStatus::Success
                } else {
                    DeliveryStatus::Failed
                },
                status_code: Some(200),
                error: None,
                latency_ms: 5,
            };

            webhooks.record_delivery(&webhook.id, &record).await.unwrap();
        }

        let deliveries = webhooks.deliveries(&webhook.id).await.unwrap();
        assert_eq!(deliveries.len(), 100, "history is capped at 100 entries");

        let stats = webhooks.stats(&webhook.id).await.unwrap();
        assert_eq!(stats.total_deliveries, 100);
        assert_eq!(stats.success_count + stats.failure_count, 100);
        assert!(stats.last_delivery.is_some());
    }
}
