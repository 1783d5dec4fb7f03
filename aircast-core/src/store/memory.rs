use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Message, Result, StateStore, StoreError, Subscription};

/// An in-process state store, used by tests and single-node setups where
/// no external store is available.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Text(String),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
}

struct Subscriber {
    channels: Vec<String>,
    sender: mpsc::Sender<Message>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<T>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> T) -> T {
        let mut entries = self.entries.lock();

        let expired = entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());

        if expired {
            entries.remove(key);
        }

        f(entries.get_mut(key))
    }

    fn insert(&self, key: &str, value: Value, ttl: Option<Duration>) {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn add_by(&self, key: &str, amount: i64) -> Result<i64> {
        let mut entries = self.entries.lock();

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Text("0".to_string()),
            expires_at: None,
        });

        let Value::Text(raw) = &mut entry.value else {
            return Err(StoreError::NotAnInteger {
                key: key.to_string(),
            });
        };

        let current: i64 = raw.parse().map_err(|_| StoreError::NotAnInteger {
            key: key.to_string(),
        })?;

        let next = current + amount;
        *raw = next.to_string();

        Ok(next)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_entry(key, |entry| {
            entry.and_then(|e| match &e.value {
                Value::Text(text) => Some(text.clone()),
                _ => None,
            })
        }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.insert(key, Value::Text(value.to_string()), None);
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.insert(key, Value::Text(value.to_string()), Some(ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.entries.lock();

        let occupied = entries
            .get(key)
            .map(|e| e.expires_at.map_or(true, |at| at > Instant::now()))
            .unwrap_or(false);

        if occupied {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );

        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.with_entry(key, |entry| {
            if let Some(entry) = entry {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        });

        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.add_by(key, 1)
    }

    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64> {
        self.add_by(key, amount)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        self.add_by(key, -1)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.entries.lock();

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });

        if let Value::Set(set) = &mut entry.value {
            set.insert(member.to_string());
        }

        Ok(())
    }

    async fn set_rem(&self, key: &str, member: &str) -> Result<()> {
        self.with_entry(key, |entry| {
            if let Some(Entry {
                value: Value::Set(set),
                ..
            }) = entry
            {
                set.remove(member);
            }
        });

        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.with_entry(key, |entry| match entry {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.iter().cloned().collect(),
            _ => vec![],
        }))
    }

    async fn set_card(&self, key: &str) -> Result<usize> {
        Ok(self.with_entry(key, |entry| match entry {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.len(),
            _ => 0,
        }))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });

        if let Value::Hash(hash) = &mut entry.value {
            hash.insert(field.to_string(), value.to_string());
        }

        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.with_entry(key, |entry| match entry {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => hash.get(field).cloned(),
            _ => None,
        }))
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<()> {
        self.with_entry(key, |entry| {
            if let Some(Entry {
                value: Value::Hash(hash),
                ..
            }) = entry
            {
                hash.remove(field);
            }
        });

        Ok(())
    }

    async fn hash_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        Ok(self.with_entry(key, |entry| match entry {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => hash.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => vec![],
        }))
    }

    async fn list_push(&self, key: &str, value: &str, max_len: usize) -> Result<()> {
        let mut entries = self.entries.lock();

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });

        if let Value::List(list) = &mut entry.value {
            list.push_front(value.to_string());
            list.truncate(max_len);
        }

        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.with_entry(key, |entry| match entry {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list.iter().cloned().collect(),
            _ => vec![],
        }))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut subscribers = self.subscribers.lock();

        // Publishers are never blocked by slow subscribers, so a full
        // mailbox drops the message for that subscriber only.
        subscribers.retain(|subscriber| {
            if !subscriber.channels.iter().any(|c| c == channel) {
                return !subscriber.sender.is_closed();
            }

            match subscriber.sender.try_send(Message {
                channel: channel.to_string(),
                payload: message.to_string(),
            }) {
                Err(mpsc::error::TrySendError::Closed(_)) => false,
                _ => true,
            }
        });

        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(64);

        self.subscribers.lock().push(Subscriber {
            channels: channels.to_vec(),
            sender,
        });

        Ok(Subscription::new(receiver))
    }
}
