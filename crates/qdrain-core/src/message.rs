//! Received message model.

use std::collections::BTreeMap;

use aws_sdk_sqs as sqs;

use crate::transport::TransportError;

/// System attributes the broker assigns on receipt.
///
/// None of these can be set as system attributes when a message is submitted
/// again; they only survive a redrive as ordinary message attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SystemAttribute {
    SentTimestamp,
    SenderId,
    ApproximateReceiveCount,
    ApproximateFirstReceiveTimestamp,
    MessageGroupId,
    MessageDeduplicationId,
    SequenceNumber,
}

impl SystemAttribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemAttribute::SentTimestamp => "SentTimestamp",
            SystemAttribute::SenderId => "SenderId",
            SystemAttribute::ApproximateReceiveCount => "ApproximateReceiveCount",
            SystemAttribute::ApproximateFirstReceiveTimestamp => {
                "ApproximateFirstReceiveTimestamp"
            }
            SystemAttribute::MessageGroupId => "MessageGroupId",
            SystemAttribute::MessageDeduplicationId => "MessageDeduplicationId",
            SystemAttribute::SequenceNumber => "SequenceNumber",
        }
    }
}

impl std::fmt::Display for SystemAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single delivery of a message, as returned by a receive call.
///
/// The receipt handle is only valid until the message is acknowledged or its
/// visibility timeout elapses.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Message {
    /// Unique identifier for the message assigned by the broker
    pub message_id: String,
    /// Handle used to delete this particular delivery
    #[serde(skip)]
    pub receipt_handle: String,
    /// The message content, byte-exact
    pub body: String,
    /// System attributes keyed by their wire name
    pub attributes: BTreeMap<String, String>,
}

/// Ordering metadata carried by every message of an ordered (FIFO) queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ordering<'a> {
    pub group_id: &'a str,
    pub deduplication_id: &'a str,
    pub sequence_number: &'a str,
}

impl Message {
    pub fn new(
        message_id: impl Into<String>,
        receipt_handle: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            receipt_handle: receipt_handle.into(),
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: SystemAttribute, value: impl Into<String>) -> Self {
        self.attributes.insert(name.as_str().to_string(), value.into());
        self
    }

    /// Converts a message from the SQS SDK.
    ///
    /// A delivery without a message id or receipt handle cannot be
    /// acknowledged, so it is rejected as a malformed response instead of
    /// being carried along half-built.
    pub fn from_sdk(message: sqs::types::Message) -> Result<Self, TransportError> {
        let message_id = message
            .message_id
            .ok_or(TransportError::MalformedResponse("message without message id"))?;
        let receipt_handle = message
            .receipt_handle
            .ok_or(TransportError::MalformedResponse("message without receipt handle"))?;

        let attributes = message
            .attributes
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name.as_str().to_string(), value))
            .collect();

        Ok(Self {
            message_id,
            receipt_handle,
            body: message.body.unwrap_or_default(),
            attributes,
        })
    }

    pub fn attribute(&self, name: SystemAttribute) -> Option<&str> {
        self.attributes.get(name.as_str()).map(String::as_str)
    }

    pub fn sent_timestamp(&self) -> Option<&str> {
        self.attribute(SystemAttribute::SentTimestamp)
    }

    /// Returns the ordering metadata when group id, deduplication id and
    /// sequence number are all present.
    pub fn ordering(&self) -> Option<Ordering<'_>> {
        Some(Ordering {
            group_id: self.attribute(SystemAttribute::MessageGroupId)?,
            deduplication_id: self.attribute(SystemAttribute::MessageDeduplicationId)?,
            sequence_number: self.attribute(SystemAttribute::SequenceNumber)?,
        })
    }
}
