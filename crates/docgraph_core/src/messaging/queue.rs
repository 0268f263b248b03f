//! Durable message channel backed by the `cascade_messages` table.
//!
//! # Responsibility
//! - Persist published messages so a crash after publish still delivers.
//! - Hand each message to one consumer at a time through a timed claim.
//! - Track delivery attempts and terminal states per message.
//!
//! # Invariants
//! - `receive` claims atomically: a `pending` message, or one whose claim
//!   expired, becomes `inflight` for exactly one caller.
//! - Only the claimed (`inflight`) state can be settled; `acked` and `dead`
//!   are terminal.
//! - An expired claim counts as one failed attempt.
//! - Delivery prefers fewer attempts, then publish order. No ordering
//!   guarantee is made across retries.

use super::{MessageId, MessagingError, Topic};
use crate::config::DEFAULT_CLAIM_LEASE_MS;
use crate::logging::sanitize_message;
use crate::repo::ensure_connection_ready;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::time::Duration;
use uuid::Uuid;

/// Maximum stored length of a failure reason.
const MAX_ERROR_CHARS: usize = 512;

/// Claim lifetime used when none is configured.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_millis(DEFAULT_CLAIM_LEASE_MS);

const CLAIM_EXPIRED_REASON: &str = "claim expired before the message was settled";

/// Lifecycle state of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    InFlight,
    Acked,
    Dead,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "inflight",
            Self::Acked => "acked",
            Self::Dead => "dead",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "inflight" => Some(Self::InFlight),
            "acked" => Some(Self::Acked),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// One message claimed by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: MessageId,
    pub payload: String,
    /// Failed attempts before this delivery.
    pub attempts: u32,
}

/// Full queue row, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message_id: MessageId,
    pub topic: String,
    pub payload: String,
    pub status: MessageStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Epoch milliseconds of the current claim; set only while `inflight`.
    pub claimed_at: Option<i64>,
}

/// Where a failed message went after [`MessageChannel::retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Released for another delivery.
    Redeliver { attempts: u32 },
    /// `max_attempts` reached; parked permanently.
    DeadLettered { attempts: u32 },
}

/// Transport contract used by producers and consumers.
pub trait MessageChannel {
    /// Stores one message on `topic` and returns its id.
    fn publish(&self, topic: &Topic, payload: &str) -> Result<MessageId, MessagingError>;
    /// Claims the next deliverable message on `topic`, if any.
    ///
    /// The claimed message stays hidden from other receivers until it is
    /// settled or the claim expires.
    fn receive(&self, topic: &Topic) -> Result<Option<Delivery>, MessagingError>;
    /// Marks a claimed message as processed.
    fn ack(&self, message_id: MessageId) -> Result<(), MessagingError>;
    /// Records a failed attempt on a claimed message in one step: the message
    /// is released for redelivery, or dead-lettered once its attempt count
    /// reaches `max_attempts`.
    fn retry(
        &self,
        message_id: MessageId,
        reason: &str,
        max_attempts: u32,
    ) -> Result<RetryDecision, MessagingError>;
    /// Parks a claimed message permanently without counting an attempt.
    fn dead_letter(&self, message_id: MessageId, reason: &str) -> Result<(), MessagingError>;
}

/// SQLite-backed message channel.
pub struct SqliteMessageQueue<'conn> {
    conn: &'conn Connection,
    claim_lease: Duration,
}

impl<'conn> SqliteMessageQueue<'conn> {
    /// Creates queue from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> Result<Self, MessagingError> {
        ensure_connection_ready(conn, &["cascade_messages"])?;
        Ok(Self {
            conn,
            claim_lease: DEFAULT_CLAIM_LEASE,
        })
    }

    /// Sets how long a claim hides a message before it is redelivered.
    pub fn with_claim_lease(mut self, claim_lease: Duration) -> Self {
        self.claim_lease = claim_lease;
        self
    }

    /// Counts deliverable (`pending`) messages on `topic`.
    pub fn pending_count(&self, topic: &Topic) -> Result<u64, MessagingError> {
        self.count(topic, MessageStatus::Pending)
    }

    /// Counts messages on `topic` in `status`.
    pub fn count(&self, topic: &Topic, status: MessageStatus) -> Result<u64, MessagingError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM cascade_messages
             WHERE topic = ?1
               AND status = ?2;",
            params![topic.as_str(), status.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Loads one message by id in any state.
    pub fn get_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<QueuedMessage>, MessagingError> {
        let mut stmt = self.conn.prepare(
            "SELECT
                message_id,
                topic,
                payload,
                status,
                attempts,
                last_error,
                claimed_at
             FROM cascade_messages
             WHERE message_id = ?1;",
        )?;
        let mut rows = stmt.query([message_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_message_row(row)?));
        }
        Ok(None)
    }

    fn lease_millis(&self) -> i64 {
        i64::try_from(self.claim_lease.as_millis()).unwrap_or(i64::MAX)
    }

    fn settle(
        &self,
        message_id: MessageId,
        status: MessageStatus,
        reason: Option<&str>,
    ) -> Result<(), MessagingError> {
        let changed = self.conn.execute(
            "UPDATE cascade_messages
             SET
                status = ?2,
                last_error = COALESCE(?3, last_error),
                claimed_at = NULL,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE message_id = ?1
               AND status = 'inflight';",
            params![
                message_id.to_string(),
                status.as_str(),
                reason.map(truncate_reason),
            ],
        )?;
        if changed == 0 {
            return Err(self.unsettled(message_id)?);
        }
        Ok(())
    }

    /// Explains why a settle matched no claimed row.
    fn unsettled(&self, message_id: MessageId) -> Result<MessagingError, MessagingError> {
        Ok(match self.get_message(message_id)? {
            Some(message) => MessagingError::NotClaimed {
                message_id,
                status: message.status,
            },
            None => MessagingError::UnknownMessage(message_id),
        })
    }
}

impl MessageChannel for SqliteMessageQueue<'_> {
    fn publish(&self, topic: &Topic, payload: &str) -> Result<MessageId, MessagingError> {
        let message_id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO cascade_messages (message_id, topic, payload, seq)
             VALUES (
                ?1,
                ?2,
                ?3,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM cascade_messages)
             );",
            params![message_id.to_string(), topic.as_str(), payload],
        )?;
        Ok(message_id)
    }

    fn receive(&self, topic: &Topic) -> Result<Option<Delivery>, MessagingError> {
        // Write lock is held before the row is chosen.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let claimed = tx
            .query_row(
                "UPDATE cascade_messages
                 SET
                    attempts = attempts + (status = 'inflight'),
                    last_error = CASE
                        WHEN status = 'inflight' THEN ?3
                        ELSE last_error
                    END,
                    status = 'inflight',
                    claimed_at = (strftime('%s', 'now') * 1000),
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE message_id = (
                    SELECT message_id
                    FROM cascade_messages
                    WHERE topic = ?1
                      AND (
                        status = 'pending'
                        OR (
                            status = 'inflight'
                            AND claimed_at <= (strftime('%s', 'now') * 1000) - ?2
                        )
                      )
                    ORDER BY attempts ASC, seq ASC
                    LIMIT 1
                 )
                 RETURNING message_id, payload, attempts;",
                params![topic.as_str(), self.lease_millis(), CLAIM_EXPIRED_REASON],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                    ))
                },
            )
            .optional()?;
        tx.commit()?;

        claimed
            .map(|(message_id, payload, attempts)| {
                Ok(Delivery {
                    message_id: parse_message_id(&message_id)?,
                    payload,
                    attempts,
                })
            })
            .transpose()
    }

    fn ack(&self, message_id: MessageId) -> Result<(), MessagingError> {
        self.settle(message_id, MessageStatus::Acked, None)
    }

    fn retry(
        &self,
        message_id: MessageId,
        reason: &str,
        max_attempts: u32,
    ) -> Result<RetryDecision, MessagingError> {
        let settled = self
            .conn
            .query_row(
                "UPDATE cascade_messages
                 SET
                    attempts = attempts + 1,
                    status = CASE
                        WHEN attempts + 1 >= ?3 THEN 'dead'
                        ELSE 'pending'
                    END,
                    last_error = ?2,
                    claimed_at = NULL,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE message_id = ?1
                   AND status = 'inflight'
                 RETURNING attempts, status;",
                params![message_id.to_string(), truncate_reason(reason), max_attempts],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match settled {
            Some((attempts, status)) if status == MessageStatus::Dead.as_str() => {
                Ok(RetryDecision::DeadLettered { attempts })
            }
            Some((attempts, _)) => Ok(RetryDecision::Redeliver { attempts }),
            None => Err(self.unsettled(message_id)?),
        }
    }

    fn dead_letter(&self, message_id: MessageId, reason: &str) -> Result<(), MessagingError> {
        self.settle(message_id, MessageStatus::Dead, Some(reason))
    }
}

fn parse_message_row(row: &Row<'_>) -> Result<QueuedMessage, MessagingError> {
    let message_id: String = row.get("message_id")?;
    let status_text: String = row.get("status")?;
    let status = MessageStatus::parse(&status_text).ok_or_else(|| {
        MessagingError::InvalidData(format!(
            "invalid status `{status_text}` in cascade_messages.status"
        ))
    })?;

    Ok(QueuedMessage {
        message_id: parse_message_id(&message_id)?,
        topic: row.get("topic")?,
        payload: row.get("payload")?,
        status,
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
        claimed_at: row.get("claimed_at")?,
    })
}

fn parse_message_id(value: &str) -> Result<MessageId, MessagingError> {
    Uuid::parse_str(value).map_err(|_| {
        MessagingError::InvalidData(format!(
            "invalid uuid `{value}` in cascade_messages.message_id"
        ))
    })
}

fn truncate_reason(reason: &str) -> String {
    sanitize_message(reason, MAX_ERROR_CHARS)
}
