//! Publishing side of the cascade bridge.

use super::queue::MessageChannel;
use super::snapshot::AuthorSnapshot;
use super::{MessageId, MessagingError, Topic};
use crate::model::author::Author;
use log::{error, info};

/// Publishes author snapshots to one topic.
pub struct CascadeProducer<C: MessageChannel> {
    channel: C,
    topic: Topic,
}

impl<C: MessageChannel> CascadeProducer<C> {
    pub fn new(channel: C, topic: Topic) -> Self {
        Self { channel, topic }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Serializes `author` and hands it to the channel.
    ///
    /// Returns once the message is stored; downstream processing is not
    /// awaited.
    pub fn publish_author_snapshot(&self, author: &Author) -> Result<MessageId, MessagingError> {
        let payload = AuthorSnapshot::from(author)
            .encode()
            .map_err(MessagingError::Encode)?;

        match self.channel.publish(&self.topic, &payload) {
            Ok(message_id) => {
                info!(
                    "event=cascade_publish module=messaging status=ok topic={} author_id={} message_id={} owned_documents={}",
                    self.topic,
                    author.id,
                    message_id,
                    author.document_ids.len()
                );
                Ok(message_id)
            }
            Err(err) => {
                error!(
                    "event=cascade_publish module=messaging status=error topic={} author_id={} error={}",
                    self.topic, author.id, err
                );
                Err(err)
            }
        }
    }
}
