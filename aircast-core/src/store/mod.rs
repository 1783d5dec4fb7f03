use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

mod memory;
mod redis;

pub use memory::*;
pub use redis::*;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or answered with a protocol error
    #[error(transparent)]
    Unavailable(Box<dyn std::error::Error + Send + Sync>),
    /// A counter operation hit a key holding a non-integer value
    #[error("value at {key} is not an integer")]
    NotAnInteger { key: String },
}

/// A message received from a pub/sub subscription.
#[derive(Debug, Clone)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// A live pub/sub subscription. Messages published between subscription and
/// cancellation are delivered once; earlier publishes are lost.
pub struct Subscription {
    receiver: mpsc::Receiver<Message>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<Message>) -> Self {
        Self { receiver }
    }

    /// Waits for the next message. Returns `None` when the subscription is
    /// no longer being fed.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

/// The coordination substrate shared by every process: atomic primitives,
/// TTL bookkeeping, and fire-and-forget pub/sub channels.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// Atomically sets a key only if it does not exist. Returns whether the
    /// value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn incr(&self, key: &str) -> Result<i64>;
    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64>;
    async fn decr(&self, key: &str) -> Result<i64>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;
    async fn set_rem(&self, key: &str, member: &str) -> Result<()>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;
    async fn set_card(&self, key: &str) -> Result<usize>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hash_del(&self, key: &str, field: &str) -> Result<()>;
    async fn hash_all(&self, key: &str) -> Result<Vec<(String, String)>>;

    /// Pushes to the head of a list, trimming it to `max_len` entries.
    async fn list_push(&self, key: &str, value: &str, max_len: usize) -> Result<()>;
    async fn list_range(&self, key: &str) -> Result<Vec<String>>;

    async fn publish(&self, channel: &str, message: &str) -> Result<()>;
    async fn subscribe(&self, channels: &[String]) -> Result<Subscription>;
}

/// A state-store lease guarding singleton background tasks across
/// replicas. Whichever instance holds the lease runs; the others idle
/// until it lapses.
pub struct Lease {
    key: String,
    instance: String,
    ttl: Duration,
}

impl Lease {
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            instance: crate::random_string(12),
            ttl,
        }
    }

    /// Acquires or refreshes the lease. Returns whether this instance may
    /// run its task.
    pub async fn acquire<S>(&self, store: &S) -> Result<bool>
    where
        S: StateStore + ?Sized,
    {
        if store
            .set_if_absent(&self.key, &self.instance, Some(self.ttl))
            .await?
        {
            return Ok(true);
        }

        let holder = store.get(&self.key).await?;

        if holder.as_deref() == Some(self.instance.as_str()) {
            store.expire(&self.key, self.ttl).await?;
            return Ok(true);
        }

        Ok(false)
    }
}

/// Helper to wrap backend errors the way components expect them.
pub(crate) trait IntoStoreError {
    fn unavailable(self) -> StoreError;
}

impl<E> IntoStoreError for E
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn unavailable(self) -> StoreError {
        StoreError::Unavailable(Box::new(self))
    }
}
