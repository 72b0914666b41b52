//! Splitting message sequences into batch calls and collecting the outcome.

use std::collections::HashMap;

use crate::mapper::OutboundMessage;
use crate::transport::{ItemFailure, QueueTransport, MAX_BATCH};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryIdError {
    #[error("batch entry id cannot be empty")]
    Empty,
    #[error("batch entry id exceeds maximum length: {0} > 80 characters")]
    TooLong(usize),
    #[error("invalid character in batch entry id: '{0}'. Allowed: alphanumeric, '-', '_'")]
    InvalidCharacter(char),
}

/// Identifies an entry within a single batch request.
///
/// SQS accepts at most 80 characters of ASCII alphanumerics, hyphens and
/// underscores, and ids must be distinct within one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(String);

impl EntryId {
    pub fn new<S: Into<String>>(id: S) -> Result<Self, EntryIdError> {
        let id_str = id.into();
        if id_str.is_empty() {
            return Err(EntryIdError::Empty);
        }
        if id_str.len() > 80 {
            return Err(EntryIdError::TooLong(id_str.len()));
        }
        if let Some(c) = id_str
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
        {
            return Err(EntryIdError::InvalidCharacter(c));
        }
        Ok(Self(id_str))
    }

    /// Entry id for the `index`-th item of a run. Always valid.
    pub fn for_index(index: usize) -> Self {
        Self(format!("m{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for EntryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partitions `items` into consecutive slices of at most `size` elements.
///
/// `size` is clamped to `1..=MAX_BATCH`; the last slice may be shorter.
pub fn chunk<T>(items: &[T], size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(size.clamp(1, MAX_BATCH))
}

/// A send call that failed as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    /// Position of the chunk in the sequence handed to [`send_all`]
    pub index: usize,
    /// Source message ids of every entry in the chunk
    pub message_ids: Vec<String>,
    pub reason: String,
}

/// A single entry refused inside an otherwise successful send call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    pub message_id: String,
    pub failure: ItemFailure,
}

/// Aggregate outcome of [`send_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Source message ids the destination confirmed, in send order
    pub sent: Vec<String>,
    pub failed_chunks: Vec<ChunkFailure>,
    pub rejected: Vec<RejectedEntry>,
}

impl TransferReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty() && self.rejected.is_empty()
    }

    /// Source message ids that did not reach the destination.
    pub fn unsent(&self) -> Vec<&str> {
        self.failed_chunks
            .iter()
            .flat_map(|c| c.message_ids.iter().map(String::as_str))
            .chain(self.rejected.iter().map(|r| r.message_id.as_str()))
            .collect()
    }

    /// Folds the report of a later [`send_all`] call into this one. Chunk
    /// indexes stay relative to the call that produced them.
    pub fn merge(&mut self, other: TransferReport) {
        self.sent.extend(other.sent);
        self.failed_chunks.extend(other.failed_chunks);
        self.rejected.extend(other.rejected);
    }
}

impl std::fmt::Display for TransferReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sent, {} failed",
            self.sent.len(),
            self.unsent().len()
        )?;
        for chunk in &self.failed_chunks {
            write!(
                f,
                "; chunk {} ({} messages): {}",
                chunk.index,
                chunk.message_ids.len(),
                chunk.reason
            )?;
        }
        for entry in &self.rejected {
            write!(f, "; message {}: {}", entry.message_id, entry.failure)?;
        }
        Ok(())
    }
}

/// Sends `messages` to `url` in chunks of at most [`MAX_BATCH`].
///
/// Keeps going after a failed chunk so a single bad call does not hold back
/// the rest of the sequence; every failure ends up in the report.
pub async fn send_all<T: QueueTransport + ?Sized>(
    transport: &T,
    url: &str,
    messages: &[OutboundMessage],
) -> TransferReport {
    let mut report = TransferReport::default();

    for (index, entries) in chunk(messages, MAX_BATCH).enumerate() {
        let sources: HashMap<_, _> = entries
            .iter()
            .map(|m| (&m.id, m.source_message_id.as_str()))
            .collect();

        match transport.send_batch(url, entries).await {
            Ok(outcome) => {
                for id in &outcome.successful {
                    if let Some(source) = sources.get(id) {
                        report.sent.push(source.to_string());
                    }
                }
                for failure in outcome.failed {
                    let message_id = sources
                        .get(&failure.id)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| failure.id.to_string());
                    log::warn!("destination refused message {message_id}: {failure}");
                    report.rejected.push(RejectedEntry {
                        message_id,
                        failure,
                    });
                }
            }
            Err(e) => {
                log::warn!("send of chunk {index} to {url} failed: {e}");
                report.failed_chunks.push(ChunkFailure {
                    index,
                    message_ids: entries
                        .iter()
                        .map(|m| m.source_message_id.clone())
                        .collect(),
                    reason: e.to_string(),
                });
            }
        }
    }

    log::debug!("sent {} of {} messages to {url}", report.sent.len(), messages.len());
    report
}
