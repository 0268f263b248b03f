//! Messaging bridge between cascade requests and the cascade coordinator.
//!
//! # Responsibility
//! - Carry author snapshots over a named topic with at-least-once delivery.
//! - Translate cascade outcomes into ack / retry / dead-letter decisions.
//!
//! # Invariants
//! - Publishing never waits for consumption.
//! - A message is acknowledged only after its cascade committed or the author
//!   was already gone; anything else stays deliverable or is dead-lettered.
//! - Snapshot document ids are informational; the cascade re-reads the author.

use crate::db::DbError;
use crate::repo::RepoError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod consumer;
pub mod producer;
pub mod queue;
pub mod snapshot;
pub mod worker;

pub use consumer::{
    sqlite_consumer, CascadeConsumer, ConsumerSettings, DeliveryOutcome, SqliteCascadeConsumer,
};
pub use producer::CascadeProducer;
pub use queue::{
    Delivery, MessageChannel, MessageStatus, QueuedMessage, RetryDecision, SqliteMessageQueue,
    DEFAULT_CLAIM_LEASE,
};
pub use snapshot::AuthorSnapshot;
pub use worker::{ConsumerWorker, WorkerStats};

/// Stable identifier of one published message.
pub type MessageId = Uuid;

static TOPIC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]{0,127}$").expect("valid topic regex"));

/// Validated topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Validates and wraps a topic name.
    pub fn new(name: &str) -> Result<Self, MessagingError> {
        let trimmed = name.trim();
        if !TOPIC_PATTERN.is_match(trimmed) {
            return Err(MessagingError::InvalidTopic(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised by the messaging bridge itself (transport failures).
#[derive(Debug)]
pub enum MessagingError {
    InvalidTopic(String),
    Encode(serde_json::Error),
    /// Queue storage failed.
    Transport(RepoError),
    /// Message id is unknown to the queue.
    UnknownMessage(MessageId),
    /// Message exists but is not claimed, so it cannot be settled.
    NotClaimed {
        message_id: MessageId,
        status: MessageStatus,
    },
    /// Persisted queue row cannot be read back.
    InvalidData(String),
    Spawn(std::io::Error),
    WorkerPanicked,
}

impl Display for MessagingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTopic(name) => write!(
                f,
                "invalid topic `{name}`; expected lowercase [a-z0-9._-], at most 128 chars"
            ),
            Self::Encode(err) => write!(f, "failed to encode message: {err}"),
            Self::Transport(err) => write!(f, "message transport failed: {err}"),
            Self::UnknownMessage(id) => write!(f, "message not found: {id}"),
            Self::NotClaimed { message_id, status } => write!(
                f,
                "message {message_id} is {} and holds no claim",
                status.as_str()
            ),
            Self::InvalidData(message) => write!(f, "invalid queued message: {message}"),
            Self::Spawn(err) => write!(f, "failed to spawn consumer worker: {err}"),
            Self::WorkerPanicked => write!(f, "consumer worker panicked"),
        }
    }
}

impl Error for MessagingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Encode(err) => Some(err),
            Self::Transport(err) => Some(err),
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for MessagingError {
    fn from(value: RepoError) -> Self {
        Self::Transport(value)
    }
}

impl From<DbError> for MessagingError {
    fn from(value: DbError) -> Self {
        Self::Transport(RepoError::Db(value))
    }
}

impl From<rusqlite::Error> for MessagingError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Transport(value.into())
    }
}
