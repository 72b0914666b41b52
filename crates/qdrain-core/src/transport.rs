//! The boundary between the drain pipeline and a remote queue service.

use crate::batch::EntryId;
use crate::mapper::OutboundMessage;
use crate::message::Message;
use crate::queue::QueueMode;

/// Hard limit on entries per receive, delete and send call.
pub const MAX_BATCH: usize = 10;

/// Seconds a received message stays hidden from other consumers.
pub const VISIBILITY_TIMEOUT_SECS: i32 = 10;

/// Run-level transport failures.
///
/// Anything in here means the remote service could not be talked to at all
/// (connectivity, authentication, unknown queue). Failures of individual
/// entries inside a batch call are reported through [`BatchOutcome`] instead.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to resolve queue '{name}': {reason}")]
    Resolve { name: String, reason: String },
    #[error("failed to read attributes of queue {url}: {reason}")]
    Attributes { url: String, reason: String },
    #[error("failed to receive messages from {url}: {reason}")]
    Receive { url: String, reason: String },
    #[error("failed to delete messages from {url}: {reason}")]
    Delete { url: String, reason: String },
    #[error("failed to send messages to {url}: {reason}")]
    Send { url: String, reason: String },
    #[error("failed to list queues: {0}")]
    List(String),
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),
}

/// Identifies one delivery to acknowledge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub id: EntryId,
    pub receipt_handle: String,
}

/// A batch entry the remote side refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: EntryId,
    pub code: String,
    pub message: Option<String>,
    pub sender_fault: bool,
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry {} failed with {}", self.id, self.code)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// Per-entry result of a batch delete or send call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub successful: Vec<EntryId>,
    pub failed: Vec<ItemFailure>,
}

/// Abstracts the remote queue API.
///
/// Every call completes (or fails) before the caller moves on; the pipeline
/// never overlaps transport calls.
#[async_trait::async_trait]
pub trait QueueTransport: Send + Sync {
    /// Resolves a queue name into its transport address.
    async fn resolve(&self, name: &str) -> Result<String, TransportError>;

    /// Looks up the ordering mode of a queue. This is an expensive call;
    /// callers cache the answer for the whole run (see [`crate::Queue`]).
    async fn mode(&self, url: &str) -> Result<QueueMode, TransportError>;

    /// Short-polls up to `max` messages (at most [`MAX_BATCH`]) and locks them
    /// for [`VISIBILITY_TIMEOUT_SECS`]. An empty list means the queue is
    /// drained for now.
    async fn receive(&self, url: &str, max: usize) -> Result<Vec<Message>, TransportError>;

    /// Acknowledges deliveries. A failed entry stays on the queue and becomes
    /// visible again once its visibility timeout elapses.
    async fn delete_batch(
        &self,
        url: &str,
        receipts: &[Receipt],
    ) -> Result<BatchOutcome, TransportError>;

    /// Sends up to [`MAX_BATCH`] messages in a single call.
    async fn send_batch(
        &self,
        url: &str,
        messages: &[OutboundMessage],
    ) -> Result<BatchOutcome, TransportError>;

    /// Lists the URLs of all queues whose name starts with `prefix`.
    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, TransportError>;
}
