use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{error, warn};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tokio::sync::mpsc;

use super::{IntoStoreError, Message, Result, StateStore, StoreError, Subscription};

/// A Redis implementation of the state store.
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| e.unavailable())?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| e.unavailable())?;

        Ok(Self { client, manager })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.connection()
            .get(key)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.connection()
            .set(key, value)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.connection()
            .set_ex(key, value, ttl.as_secs())
            .await
            .map_err(|e| e.unavailable())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut command = redis::cmd("SET");
        command.arg(key).arg(value).arg("NX");

        if let Some(ttl) = ttl {
            command.arg("EX").arg(ttl.as_secs());
        }

        let reply: Option<String> = command
            .query_async(&mut self.connection())
            .await
            .map_err(|e| e.unavailable())?;

        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.connection()
            .del(key)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.connection()
            .expire(key, ttl.as_secs() as i64)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.connection()
            .incr(key, 1)
            .await
            .map_err(|e| match e.kind() {
                redis::ErrorKind::TypeError => StoreError::NotAnInteger {
                    key: key.to_string(),
                },
                _ => e.unavailable(),
            })
    }

    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64> {
        self.connection()
            .incr(key, amount)
            .await
            .map_err(|e| match e.kind() {
                redis::ErrorKind::TypeError => StoreError::NotAnInteger {
                    key: key.to_string(),
                },
                _ => e.unavailable(),
            })
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        self.connection()
            .decr(key, 1)
            .await
            .map_err(|e| match e.kind() {
                redis::ErrorKind::TypeError => StoreError::NotAnInteger {
                    key: key.to_string(),
                },
                _ => e.unavailable(),
            })
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.connection()
            .sadd(key, member)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn set_rem(&self, key: &str, member: &str) -> Result<()> {
        self.connection()
            .srem(key, member)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.connection()
            .smembers(key)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn set_card(&self, key: &str) -> Result<usize> {
        self.connection()
            .scard(key)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.connection()
            .hset(key, field, value)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.connection()
            .hget(key, field)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<()> {
        self.connection()
            .hdel(key, field)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn hash_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        self.connection()
            .hgetall(key)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn list_push(&self, key: &str, value: &str, max_len: usize) -> Result<()> {
        let mut connection = self.connection();

        let _: () = connection
            .lpush(key, value)
            .await
            .map_err(|e| e.unavailable())?;

        connection
            .ltrim(key, 0, max_len.saturating_sub(1) as isize)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        self.connection()
            .lrange(key, 0, -1)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.connection()
            .publish(channel, message)
            .await
            .map_err(|e| e.unavailable())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| e.unavailable())?;

        for channel in channels {
            pubsub.subscribe(channel).await.map_err(|e| e.unavailable())?;
        }

        let (sender, receiver) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();

            while let Some(message) = stream.next().await {
                let channel = message.get_channel_name().to_string();
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Dropping non-text pub/sub payload on {channel}: {e}");
                        continue;
                    }
                };

                if sender.send(Message { channel, payload }).await.is_err() {
                    // Subscriber is gone, stop feeding it
                    return;
                }
            }

            error!("Pub/sub connection closed");
        });

        Ok(Subscription::new(receiver))
    }
}
