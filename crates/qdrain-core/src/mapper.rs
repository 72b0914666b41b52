//! Translation from received messages to submittable ones.
//!
//! A received message carries read-only system attributes. To submit it again
//! the body is copied unchanged, the ordering fields an ordered queue demands
//! are set, and the remaining system attributes are carried over as plain
//! string message attributes.

use std::collections::BTreeMap;

use crate::batch::EntryId;
use crate::dedup;
use crate::message::{Message, SystemAttribute};
use crate::queue::QueueMode;

/// Delivery delay applied to messages sent to standard queues, so a redrive
/// into the queue being drained does not hand them straight back.
pub const DEFAULT_DELAY_SECONDS: i32 = 1;

/// Attributes copied as plain message attributes into an ordered queue.
const ORDERED_CARRIED: [SystemAttribute; 5] = [
    SystemAttribute::SentTimestamp,
    SystemAttribute::SequenceNumber,
    SystemAttribute::SenderId,
    SystemAttribute::ApproximateFirstReceiveTimestamp,
    SystemAttribute::ApproximateReceiveCount,
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("message {message_id} has no {attribute} attribute")]
    MissingAttribute {
        message_id: String,
        attribute: SystemAttribute,
    },
    #[error("message {message_id} has an empty {attribute} attribute")]
    EmptyAttribute {
        message_id: String,
        attribute: SystemAttribute,
    },
}

/// The outbound representation of a message, built fresh for each send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Batch entry id, unique within one send call
    pub id: EntryId,
    /// Id of the received message this was built from
    pub source_message_id: String,
    pub body: String,
    pub delay_seconds: Option<i32>,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
    /// String-typed message attributes
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct AttributeMapper {
    delay_seconds: i32,
}

impl Default for AttributeMapper {
    fn default() -> Self {
        Self {
            delay_seconds: DEFAULT_DELAY_SECONDS,
        }
    }
}

impl AttributeMapper {
    pub fn with_delay(delay_seconds: i32) -> Self {
        Self { delay_seconds }
    }

    /// Builds the payload for sending `message` into a queue of mode
    /// `destination`.
    ///
    /// Fails, without building anything, when an attribute the destination
    /// needs is missing from the source message.
    pub fn map(
        &self,
        message: &Message,
        destination: QueueMode,
        id: EntryId,
    ) -> Result<OutboundMessage, MappingError> {
        let mut outbound = OutboundMessage {
            id,
            source_message_id: message.message_id.clone(),
            body: message.body.clone(),
            delay_seconds: None,
            group_id: None,
            deduplication_id: None,
            attributes: BTreeMap::new(),
        };

        match destination {
            QueueMode::Standard => {
                let sent = required(message, SystemAttribute::SentTimestamp)?;
                outbound
                    .attributes
                    .insert(SystemAttribute::SentTimestamp.as_str().to_string(), sent.to_string());
                outbound.delay_seconds = Some(self.delay_seconds);
            }
            QueueMode::Ordered => {
                let group_id = required(message, SystemAttribute::MessageGroupId)?;
                if group_id.is_empty() {
                    return Err(MappingError::EmptyAttribute {
                        message_id: message.message_id.clone(),
                        attribute: SystemAttribute::MessageGroupId,
                    });
                }

                for attribute in ORDERED_CARRIED {
                    let value = required(message, attribute)?;
                    outbound
                        .attributes
                        .insert(attribute.as_str().to_string(), value.to_string());
                }
                outbound.attributes.insert(
                    SystemAttribute::MessageGroupId.as_str().to_string(),
                    group_id.to_string(),
                );

                outbound.group_id = Some(group_id.to_string());
                // the original id may still be inside the broker's dedup window
                outbound.deduplication_id = Some(dedup::fresh_deduplication_id(
                    message.attribute(SystemAttribute::MessageDeduplicationId),
                ));
            }
        }

        Ok(outbound)
    }
}

fn required(message: &Message, attribute: SystemAttribute) -> Result<&str, MappingError> {
    message
        .attribute(attribute)
        .ok_or_else(|| MappingError::MissingAttribute {
            message_id: message.message_id.clone(),
            attribute,
        })
}
