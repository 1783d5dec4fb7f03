use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::Source;

mod live;
mod memory;
mod tcp;

pub use live::*;
pub use memory::*;
pub use tcp::*;

pub type Result<T> = std::result::Result<T, ChannelError>;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The socket could not be reached
    #[error("channel unreachable: {0}")]
    Unreachable(#[from] std::io::Error),
    /// The remote end rejected a command or answered nonsense
    #[error("channel protocol error: {0}")]
    Protocol(String),
    /// The exchange did not complete in time
    #[error("channel timed out")]
    Timeout,
    /// The operation does not exist on this transport
    #[error("operation not supported on the {0} source")]
    Unsupported(&'static str),
}

/// A song as reported by a queue control socket.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSong {
    pub id: u64,
    pub file: String,
    pub position: u64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub playing: bool,
    pub queue_length: u64,
}

/// Control surface of one mixer queue socket.
#[async_trait]
pub trait QueueChannel: Send + Sync + 'static {
    async fn status(&self) -> Result<QueueStatus>;
    async fn current(&self) -> Result<Option<QueueSong>>;
    async fn songs(&self) -> Result<Vec<QueueSong>>;

    /// Makes the queue pick up new files, then appends one to the tail.
    /// Returns the queue-assigned song id.
    async fn add(&self, file: &str) -> Result<u64>;
    async fn remove(&self, id: u64) -> Result<()>;
    async fn clear(&self) -> Result<()>;

    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;

    async fn set_consume(&self, enabled: bool) -> Result<()>;
    async fn set_repeat(&self, enabled: bool) -> Result<()>;
    async fn set_random(&self, enabled: bool) -> Result<()>;
}

/// The command channel used to force a live session off the air.
#[async_trait]
pub trait LiveControl: Send + Sync + 'static {
    async fn disconnect(&self, input_id: &str) -> Result<()>;
}

/// The three mixer-facing transports behind one control interface, so the
/// observer and the queue controller can address sources uniformly.
#[derive(Clone)]
pub enum SourceChannel {
    UserQueue(Arc<dyn QueueChannel>),
    FallbackQueue(Arc<dyn QueueChannel>),
    Live(Arc<dyn LiveControl>),
}

impl SourceChannel {
    pub fn source(&self) -> Source {
        match self {
            Self::UserQueue(_) => Source::User,
            Self::FallbackQueue(_) => Source::Fallback,
            Self::Live(_) => Source::Livestream,
        }
    }

    pub async fn play(&self) -> Result<()> {
        match self {
            Self::UserQueue(queue) | Self::FallbackQueue(queue) => queue.play().await,
            Self::Live(_) => Err(ChannelError::Unsupported("livestream")),
        }
    }

    pub async fn pause(&self) -> Result<()> {
        match self {
            Self::UserQueue(queue) | Self::FallbackQueue(queue) => queue.pause().await,
            Self::Live(_) => Err(ChannelError::Unsupported("livestream")),
        }
    }

    pub async fn resume(&self) -> Result<()> {
        match self {
            Self::UserQueue(queue) | Self::FallbackQueue(queue) => queue.resume().await,
            Self::Live(_) => Err(ChannelError::Unsupported("livestream")),
        }
    }

    /// The current song of the source. The live source carries no queue, so
    /// it never reports one; its metadata arrives through callbacks instead.
    pub async fn current(&self) -> Result<Option<QueueSong>> {
        match self {
            Self::UserQueue(queue) | Self::FallbackQueue(queue) => queue.current().await,
            Self::Live(_) => Ok(None),
        }
    }
}
