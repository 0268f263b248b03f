//! Consuming side of the cascade bridge.
//!
//! # Responsibility
//! - Decode snapshots and invoke the cascade coordinator with the author id.
//! - Apply the delivery policy to each cascade outcome.
//!
//! # Invariants
//! - Every delivery is claimed first; a message is processed by one
//!   consumer at a time even when several share a database.
//! - Ack only after commit, or when the author is already gone.
//! - Undecodable payloads are dead-lettered without retry.
//! - Other failures are retried until `max_attempts`, then dead-lettered.

use super::queue::{Delivery, MessageChannel, RetryDecision, SqliteMessageQueue};
use super::snapshot::AuthorSnapshot;
use super::{MessageId, MessagingError, Topic};
use crate::cascade::{CascadeCoordinator, CascadeErrorKind, CascadeReport};
use crate::config::MessagingConfig;
use crate::model::author::AuthorId;
use crate::repo::cascade_store::SqliteCascadeStore;
use crate::repo::CascadeStore;
use log::{error, info, warn};
use rusqlite::Connection;
use std::time::Duration;

/// Consumer delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub topic: Topic,
    /// Failed attempts after which a message is dead-lettered.
    pub max_attempts: u32,
    /// How long a claimed message stays hidden from other consumers.
    pub claim_lease: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &MessagingConfig) -> Result<Self, MessagingError> {
        Ok(Self {
            topic: Topic::new(&config.topic)?,
            max_attempts: config.max_attempts.max(1),
            claim_lease: config.claim_lease(),
        })
    }
}

/// Consumer whose queue and cascade store share one SQLite connection.
pub type SqliteCascadeConsumer<'conn> =
    CascadeConsumer<SqliteMessageQueue<'conn>, SqliteCascadeStore<'conn>>;

/// Builds a consumer over a migrated connection.
pub fn sqlite_consumer(
    conn: &Connection,
    settings: ConsumerSettings,
) -> Result<SqliteCascadeConsumer<'_>, MessagingError> {
    let queue = SqliteMessageQueue::try_new(conn)?.with_claim_lease(settings.claim_lease);
    let store = SqliteCascadeStore::try_new(conn)?;
    Ok(CascadeConsumer::new(
        queue,
        CascadeCoordinator::new(store),
        settings,
    ))
}

/// What happened to one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Cascade committed; message acknowledged.
    Completed {
        message_id: MessageId,
        report: CascadeReport,
    },
    /// Author no longer exists; message acknowledged without changes.
    AlreadyRemoved {
        message_id: MessageId,
        author_id: AuthorId,
    },
    /// Cascade failed; message stays deliverable.
    Retrying {
        message_id: MessageId,
        attempts: u32,
        error_kind: CascadeErrorKind,
    },
    /// Message parked permanently.
    DeadLettered {
        message_id: MessageId,
        reason: String,
    },
}

/// Pulls snapshots from a channel and runs the cascade for each.
pub struct CascadeConsumer<C: MessageChannel, S: CascadeStore> {
    channel: C,
    coordinator: CascadeCoordinator<S>,
    settings: ConsumerSettings,
}

impl<C: MessageChannel, S: CascadeStore> CascadeConsumer<C, S> {
    pub fn new(
        channel: C,
        coordinator: CascadeCoordinator<S>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            channel,
            coordinator,
            settings,
        }
    }

    pub fn coordinator(&self) -> &CascadeCoordinator<S> {
        &self.coordinator
    }

    /// Processes at most one message.
    ///
    /// Returns `Ok(None)` when the topic has nothing deliverable. Transport
    /// errors are returned; cascade errors become outcomes.
    pub fn poll_once(&self) -> Result<Option<DeliveryOutcome>, MessagingError> {
        let Some(delivery) = self.channel.receive(&self.settings.topic)? else {
            return Ok(None);
        };
        self.handle(delivery).map(Some)
    }

    /// Processes messages until the topic has nothing deliverable.
    ///
    /// Failing messages are redelivered immediately, so each one is bounded
    /// by `max_attempts`.
    pub fn drain(&self) -> Result<Vec<DeliveryOutcome>, MessagingError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.poll_once()? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn handle(&self, delivery: Delivery) -> Result<DeliveryOutcome, MessagingError> {
        let message_id = delivery.message_id;
        let snapshot = match AuthorSnapshot::decode(&delivery.payload) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let reason = format!("undecodable payload: {err}");
                error!(
                    "event=cascade_consume module=messaging status=dead_letter topic={} message_id={} error={}",
                    self.settings.topic, message_id, err
                );
                self.channel.dead_letter(message_id, &reason)?;
                return Ok(DeliveryOutcome::DeadLettered { message_id, reason });
            }
        };

        let author_id = snapshot.author_id;
        info!(
            "event=cascade_consume module=messaging status=start topic={} message_id={} author_id={} attempt={}",
            self.settings.topic,
            message_id,
            author_id,
            delivery.attempts + 1
        );

        match self.coordinator.cascade_delete_author(author_id) {
            Ok(report) => {
                self.channel.ack(message_id)?;
                info!(
                    "event=cascade_consume module=messaging status=ok message_id={} author_id={}",
                    message_id, author_id
                );
                Ok(DeliveryOutcome::Completed { message_id, report })
            }
            Err(err) if err.kind() == CascadeErrorKind::NotFound => {
                self.channel.ack(message_id)?;
                warn!(
                    "event=cascade_consume module=messaging status=skipped message_id={} author_id={} reason=author_not_found",
                    message_id, author_id
                );
                Ok(DeliveryOutcome::AlreadyRemoved {
                    message_id,
                    author_id,
                })
            }
            Err(err) => {
                let reason = err.to_string();
                let decision = self
                    .channel
                    .retry(message_id, &reason, self.settings.max_attempts)?;
                match decision {
                    RetryDecision::DeadLettered { attempts } => {
                        error!(
                            "event=cascade_consume module=messaging status=dead_letter message_id={} author_id={} attempts={} error={}",
                            message_id, author_id, attempts, reason
                        );
                        Ok(DeliveryOutcome::DeadLettered { message_id, reason })
                    }
                    RetryDecision::Redeliver { attempts } => {
                        warn!(
                            "event=cascade_consume module=messaging status=retry message_id={} author_id={} attempts={} error_kind={}",
                            message_id,
                            author_id,
                            attempts,
                            err.kind().as_str()
                        );
                        Ok(DeliveryOutcome::Retrying {
                            message_id,
                            attempts,
                            error_kind: err.kind(),
                        })
                    }
                }
            }
        }
    }
}
