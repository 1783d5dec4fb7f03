use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, info, warn};

use aircast_core::{
    store::{Lease, StateStore},
    Envelope,
};

use crate::{db::Database, StationContext, WebhookManager};

const DISPATCH_LEASE_KEY: &str = "lease:webhook-dispatch";
const LEASE_TTL: Duration = Duration::from_secs(30);

/// Consumes every event channel and fans deliveries out to matching
/// subscriptions.
///
/// A state-store lease keeps a second replica idle until the holder
/// lapses, so a single-dispatcher deployment gets at-least-once delivery
/// without double sends.
pub struct WebhookDispatcher<S, Db> {
    context: StationContext<S, Db>,
    manager: WebhookManager<S, Db>,
}

impl<S, Db> WebhookDispatcher<S, Db>
where
    S: StateStore,
    Db: Database,
{
    pub fn new(context: &StationContext<S, Db>) -> Self {
        Self {
            context: context.clone(),
            manager: WebhookManager::new(context),
        }
    }

    pub async fn run(self) {
        let lease = Lease::new(DISPATCH_LEASE_KEY, LEASE_TTL);

        loop {
            match lease.acquire(self.context.store.as_ref()).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Dispatch lease held elsewhere, standing by");
                    tokio::time::sleep(LEASE_TTL / 2).await;
                    continue;
                }
                Err(e) => {
                    warn!("Dispatch lease check failed: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            }

            let mut subscription = match self.context.events.subscribe_all().await {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!("Failed to subscribe to event channels: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            info!("Webhook dispatcher subscribed to all event channels");

            while let Some(message) = subscription.next_message().await {
                if let Err(e) = lease.acquire(self.context.store.as_ref()).await {
                    warn!("Dispatch lease refresh failed: {e}");
                }

                let envelope: Envelope = match serde_json::from_str(&message.payload) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("Dropping undecodable event payload: {e}");
                        continue;
                    }
                };

                self.dispatch(&envelope).await;
            }

            warn!("Event subscription ended, resubscribing");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Delivers one envelope to every matching subscription, in parallel.
    /// Failures are recorded, never fed back to the event source.
    pub async fn dispatch(&self, envelope: &Envelope) {
        let webhooks = match self
            .context
            .database
            .webhooks_for_event(&envelope.event_type)
            .await
        {
            Ok(webhooks) => webhooks,
            Err(e) => {
                warn!("Failed to look up subscriptions: {e}");
                return;
            }
        };

        if webhooks.is_empty() {
            debug!("No webhooks subscribed to {}", envelope.event_type);
            return;
        }

        let outcomes = join_all(
            webhooks
                .iter()
                .map(|webhook| self.manager.deliver(webhook, envelope)),
        )
        .await;

        let failures = outcomes.iter().filter(|o| o.error.is_some()).count();

        info!(
            "{}: {} delivered, {failures} failed",
            envelope.event_type,
            outcomes.len() - failures,
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{test_station, TestMediaTools};
    use crate::{canonical_body, sign_payload, NewSubscription};

    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Accepts one HTTP request on a loopback socket and hands back its
    /// head and body.
    async fn accept_one(
        listener: tokio::net::TcpListener,
    ) -> tokio::task::JoinHandle<(String, Vec<u8>)> {
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut buffer = vec![];
            let mut chunk = [0u8; 4096];

            let (head, mut body) = loop {
                let read = socket.read(&mut chunk).await.unwrap();
                buffer.extend_from_slice(&chunk[..read]);

                if let Some(split) = find_header_end(&buffer) {
                    let head = String::from_utf8_lossy(&buffer[..split]).to_string();
                    break (head, buffer[split + 4..].to_vec());
                }
            };

            let content_length: usize = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse().ok())?
                })
                .unwrap_or(0);

            while body.len() < content_length {
                let read = socket.read(&mut chunk).await.unwrap();
                body.extend_from_slice(&chunk[..read]);
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();

            (head, body)
        })
    }

    fn find_header_end(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
        head.lines().find_map(|line| {
            let (header, value) = line.split_once(':')?;
            header.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    #[tokio::test]
    async fn test_delivery_signature_verifies_against_the_body() {
        let station = test_station(TestMediaTools::new(180.0));
        let dispatcher = WebhookDispatcher::new(&station.context);
        let webhooks = WebhookManager::new(&station.context);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let request = accept_one(listener).await;

        let signing_key = "k".repeat(16);
        let webhook = webhooks
            .subscribe(NewSubscription {
                url: format!("http://{addr}/hook"),
                events: vec!["song_changed".to_string()],
                signing_key: signing_key.clone(),
                description: None,
            })
            .await
            .unwrap();

        let envelope = Envelope {
            event_type: "song_changed".to_string(),
            description: "Playing next: Midnight".to_string(),
            data: serde_json::json!({
                "source": "user",
                "metadata": { "title": "Midnight", "artist": "Someone" },
            }),
            timestamp: Utc::now().to_rfc3339(),
        };

        dispatcher.dispatch(&envelope).await;

        let (head, body) = request.await.unwrap();

        // The receiver recomputes the signature over the raw body bytes
        let body_text = String::from_utf8(body).unwrap();
        let expected = format!("sha256={}", sign_payload(&signing_key, &body_text));

        assert_eq!(
            header_value(&head, "x-webhook-signature"),
            Some(expected.as_str()),
            "the signature header must verify against the exact body"
        );
        assert!(header_value(&head, "x-webhook-timestamp").is_some());
        assert_eq!(
            header_value(&head, "content-type"),
            Some("application/json")
        );

        // The body is the canonical serialization of the envelope
        assert_eq!(body_text, canonical_body(&envelope));

        // The outcome is retained in the delivery history
        let deliveries = webhooks.deliveries(&webhook.id).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].status, crate::DeliveryStatus::Success);
        assert_eq!(deliveries[0].status_code, Some(200));
    }

    #[tokio::test]
    async fn test_unmatched_events_are_not_delivered() {
        let station = test_station(TestMediaTools::new(180.0));
        let dispatcher = WebhookDispatcher::new(&station.context);
        let webhooks = WebhookManager::new(&station.context);

        let webhook = webhooks
            .subscribe(NewSubscription {
                // Nothing listens here; a delivery attempt would fail loudly
                url: "http://127.0.0.1:9/hook".to_string(),
                events: vec!["livestream_started".to_string()],
                signing_key: "k".repeat(16),
                description: None,
            })
            .await
            .unwrap();

        let envelope = Envelope {
            event_type: "song_changed".to_string(),
            description: "irrelevant".to_string(),
            data: serde_json::Value::Null,
            timestamp: Utc::now().to_rfc3339(),
        };

        dispatcher.dispatch(&envelope).await;

        assert!(
            webhooks.deliveries(&webhook.id).await.unwrap().is_empty(),
            "an unmatched event must not be delivered"
        );
    }
}
