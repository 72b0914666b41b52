//! [`QueueTransport`] backed by the AWS SQS SDK.

use aws_config::SdkConfig;
use aws_sdk_sqs as sqs;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use sqs::types::{
    DeleteMessageBatchRequestEntry, MessageAttributeValue, MessageSystemAttributeName,
    QueueAttributeName, SendMessageBatchRequestEntry,
};

use crate::batch::EntryId;
use crate::mapper::OutboundMessage;
use crate::message::Message;
use crate::queue::QueueMode;
use crate::transport::{
    BatchOutcome, ItemFailure, QueueTransport, Receipt, TransportError, MAX_BATCH,
    VISIBILITY_TIMEOUT_SECS,
};

/// Client for draining SQS queues.
///
/// Constructed once per run and handed by reference to everything that talks
/// to the queue service.
///
/// # Example
///
/// ```no_run
/// use qdrain::{Queue, SqsTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = aws_config::from_env().load().await;
/// let transport = SqsTransport::from_config(config);
///
/// let queue = Queue::open(&transport, "my-dlq").await?;
/// println!("{} is ordered: {}", queue.url, queue.is_ordered());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqsTransport {
    /// The AWS SDK configuration used for SQS operations
    pub config: SdkConfig,
    /// The SQS client instance
    pub client: sqs::Client,
}

impl SqsTransport {
    /// Creates a transport from a pre-built AWS SDK config.
    pub fn from_config(config: SdkConfig) -> Self {
        let client = sqs::Client::new(&config);
        Self { config, client }
    }
}

/// Renders an SDK error with its full source chain.
fn reason<E, R>(e: SdkError<E, R>) -> String
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    if let SdkError::ServiceError(se) = &e {
        // the primary service error message, e.g. AWS.SimpleQueueService.NonExistentQueue
        let err = se.err();
        if let Some(message) = err.message() {
            return format!("{}: {}", err.code().unwrap_or("ServiceError"), message);
        }
    }
    DisplayErrorContext(e).to_string()
}

fn entry_id(id: String) -> Result<EntryId, TransportError> {
    EntryId::new(id).map_err(|_| TransportError::MalformedResponse("invalid batch entry id"))
}

fn failures(failed: &[sqs::types::BatchResultErrorEntry]) -> Result<Vec<ItemFailure>, TransportError> {
    failed
        .iter()
        .map(|f| {
            Ok(ItemFailure {
                id: entry_id(f.id().to_string())?,
                code: f.code().to_string(),
                message: f.message().map(str::to_string),
                sender_fault: f.sender_fault(),
            })
        })
        .collect()
}

fn string_attribute(value: &str) -> Result<MessageAttributeValue, TransportError> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .map_err(|_| TransportError::MalformedResponse("invalid message attribute"))
}

fn send_entry(message: &OutboundMessage) -> Result<SendMessageBatchRequestEntry, TransportError> {
    let mut builder = SendMessageBatchRequestEntry::builder()
        .id(message.id.as_str())
        .message_body(&message.body)
        .set_delay_seconds(message.delay_seconds)
        .set_message_group_id(message.group_id.clone())
        .set_message_deduplication_id(message.deduplication_id.clone());

    for (name, value) in &message.attributes {
        builder = builder.message_attributes(name, string_attribute(value)?);
    }

    builder
        .build()
        .map_err(|_| TransportError::MalformedResponse("invalid send batch entry"))
}

#[async_trait::async_trait]
impl QueueTransport for SqsTransport {
    async fn resolve(&self, name: &str) -> Result<String, TransportError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| TransportError::Resolve {
                name: name.to_string(),
                reason: reason(e),
            })?;

        output
            .queue_url
            .ok_or(TransportError::MalformedResponse("queue url missing from response"))
    }

    async fn mode(&self, url: &str) -> Result<QueueMode, TransportError> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(QueueAttributeName::FifoQueue)
            .send()
            .await
            .map_err(|e| TransportError::Attributes {
                url: url.to_string(),
                reason: reason(e),
            })?;

        // standard queues do not report the attribute at all
        let fifo = output
            .attributes()
            .and_then(|a| a.get(&QueueAttributeName::FifoQueue))
            .map(|v| v.parse::<bool>())
            .transpose()
            .map_err(|_| TransportError::MalformedResponse("FifoQueue attribute is not a boolean"))?
            .unwrap_or(false);

        Ok(if fifo {
            QueueMode::Ordered
        } else {
            QueueMode::Standard
        })
    }

    async fn receive(&self, url: &str, max: usize) -> Result<Vec<Message>, TransportError> {
        let output = self
            .client
            .receive_message()
            .queue_url(url)
            .max_number_of_messages(max.clamp(1, MAX_BATCH) as i32)
            .visibility_timeout(VISIBILITY_TIMEOUT_SECS)
            .wait_time_seconds(0)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| TransportError::Receive {
                url: url.to_string(),
                reason: reason(e),
            })?;

        // None means every message was received recently, same as empty
        output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(Message::from_sdk)
            .collect()
    }

    async fn delete_batch(
        &self,
        url: &str,
        receipts: &[Receipt],
    ) -> Result<BatchOutcome, TransportError> {
        // SQS rejects empty batch requests
        if receipts.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let entries = receipts
            .iter()
            .map(|r| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(r.id.as_str())
                    .receipt_handle(&r.receipt_handle)
                    .build()
                    .map_err(|_| TransportError::MalformedResponse("invalid delete batch entry"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| TransportError::Delete {
                url: url.to_string(),
                reason: reason(e),
            })?;

        Ok(BatchOutcome {
            successful: output
                .successful()
                .iter()
                .map(|s| entry_id(s.id().to_string()))
                .collect::<Result<_, _>>()?,
            failed: failures(output.failed())?,
        })
    }

    async fn send_batch(
        &self,
        url: &str,
        messages: &[OutboundMessage],
    ) -> Result<BatchOutcome, TransportError> {
        if messages.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let entries = messages
            .iter()
            .map(send_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| TransportError::Send {
                url: url.to_string(),
                reason: reason(e),
            })?;

        Ok(BatchOutcome {
            successful: output
                .successful()
                .iter()
                .map(|s| entry_id(s.id().to_string()))
                .collect::<Result<_, _>>()?,
            failed: failures(output.failed())?,
        })
    }

    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, TransportError> {
        let mut queues = Vec::new();
        let mut next_token = None;

        loop {
            let output = self
                .client
                .list_queues()
                .set_queue_name_prefix(prefix.map(str::to_string))
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| TransportError::List(reason(e)))?;

            queues.extend(output.queue_urls().iter().cloned());

            let Some(token) = output.next_token else {
                break;
            };
            next_token = Some(token);
        }

        Ok(queues)
    }
}
