//! The drain loop.
//!
//! Repeatedly receives a batch from the source queue, hands each message to a
//! [`Sink`], and deletes what the sink confirmed. Delivery is at-least-once:
//! a message whose delete fails stays on the source and is received again by
//! a later run, so its output can appear twice.

use std::collections::HashSet;

use crate::batch::{EntryId, TransferReport};
use crate::mapper::MappingError;
use crate::queue::Queue;
use crate::sink::{Sink, SinkError, Verdict};
use crate::transport::{BatchOutcome, ItemFailure, QueueTransport, Receipt, TransportError, MAX_BATCH};

#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Draining,
    /// The source returned an empty receive.
    Empty,
    /// A run-level failure stopped the drain.
    Aborted,
}

/// A message the sink refused; it was left on the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub message_id: String,
    pub error: MappingError,
}

/// A message that could not be acknowledged and will reappear on the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub message_id: String,
    pub failure: ItemFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub batches: usize,
    pub received: usize,
    pub acknowledged: usize,
    /// Redeliveries of messages already left behind earlier in the run
    pub redelivered: usize,
    pub rejected: Vec<ItemError>,
    /// Accepted by the sink but never confirmed, e.g. a failed send
    pub unconfirmed: Vec<String>,
    pub delete_failures: Vec<DeleteFailure>,
    pub transfer: Option<TransferReport>,
}

impl DrainReport {
    /// Number of distinct messages this run left on the source queue.
    pub fn left_on_source(&self) -> usize {
        self.rejected.len() + self.unconfirmed.len() + self.delete_failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.left_on_source() == 0
    }
}

impl std::fmt::Display for DrainReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received {} messages in {} batches, acknowledged {}, left {} on the source",
            self.received,
            self.batches,
            self.acknowledged,
            self.left_on_source()
        )?;
        if let Some(transfer) = &self.transfer {
            write!(f, ", transferred {}", transfer.sent.len())?;
        }
        Ok(())
    }
}

/// Receipts the delete outcome neither confirmed nor failed, by position.
fn unanswered(receipts: &[Receipt], outcome: &BatchOutcome) -> Vec<(usize, ItemFailure)> {
    receipts
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            !outcome.successful.contains(&r.id) && !outcome.failed.iter().any(|f| f.id == r.id)
        })
        .map(|(i, r)| {
            (
                i,
                ItemFailure {
                    id: r.id.clone(),
                    code: "MissingFromResponse".to_string(),
                    message: None,
                    sender_fault: false,
                },
            )
        })
        .collect()
}

pub struct Drainer<'a, T: QueueTransport + ?Sized> {
    transport: &'a T,
    source: &'a Queue,
    batch_size: usize,
}

impl<'a, T: QueueTransport + ?Sized> Drainer<'a, T> {
    pub fn new(transport: &'a T, source: &'a Queue) -> Self {
        Self {
            transport,
            source,
            batch_size: MAX_BATCH,
        }
    }

    /// Messages requested per receive, clamped to `1..=MAX_BATCH`.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH);
        self
    }

    /// Drains the source into `sink` until a receive comes back empty.
    ///
    /// Returns an error only for run-level failures: the transport becoming
    /// unusable, the sink failing to write, or staged messages that could not
    /// be sent after their deletion. Everything else is reported per item in
    /// the [`DrainReport`].
    pub async fn run<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<DrainReport, DrainError> {
        match self.drain(sink).await {
            Ok(report) => {
                log::info!("drained {}: {report}", self.source.name);
                Ok(report)
            }
            Err(e) => {
                log::debug!("drain of {} is {:?}", self.source.name, DrainState::Aborted);
                Err(e)
            }
        }
    }

    async fn drain<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<DrainReport, DrainError> {
        let mut report = DrainReport::default();
        // messages left on the source this run; skipped if they come back
        let mut held: HashSet<String> = HashSet::new();
        let mut state = DrainState::Draining;

        while state == DrainState::Draining {
            let messages = self
                .transport
                .receive(&self.source.url, self.batch_size)
                .await?;

            if messages.is_empty() {
                state = DrainState::Empty;
                continue;
            }

            report.batches += 1;
            report.received += messages.len();
            log::debug!(
                "batch {} from {}: {} messages",
                report.batches,
                self.source.name,
                messages.len()
            );

            let fresh: Vec<_> = messages
                .iter()
                .filter(|m| !held.contains(&m.message_id))
                .collect();
            report.redelivered += messages.len() - fresh.len();
            if fresh.is_empty() {
                // only messages already left behind came back: the snapshot is done
                state = DrainState::Empty;
                continue;
            }

            let mut accepted = Vec::with_capacity(fresh.len());
            for message in fresh {
                match sink.accept(message).await? {
                    Verdict::Accepted => accepted.push(message),
                    Verdict::Rejected(error) => {
                        log::warn!("leaving message {} on the source: {error}", message.message_id);
                        held.insert(message.message_id.clone());
                        report.rejected.push(ItemError {
                            message_id: message.message_id.clone(),
                            error,
                        });
                    }
                }
            }

            let confirmed: HashSet<String> = sink.commit().await?.into_iter().collect();
            let mut acknowledge = Vec::with_capacity(accepted.len());
            for message in accepted {
                if confirmed.contains(&message.message_id) {
                    acknowledge.push(message);
                } else {
                    log::warn!("message {} was not confirmed, leaving it on the source", message.message_id);
                    held.insert(message.message_id.clone());
                    report.unconfirmed.push(message.message_id.clone());
                }
            }

            let receipts: Vec<Receipt> = acknowledge
                .iter()
                .enumerate()
                .map(|(i, m)| Receipt {
                    id: EntryId::for_index(i),
                    receipt_handle: m.receipt_handle.clone(),
                })
                .collect();

            if receipts.is_empty() {
                continue;
            }

            // a failed call aborts the run, failed entries do not
            let outcome = self
                .transport
                .delete_batch(&self.source.url, &receipts)
                .await?;

            report.acknowledged += outcome.successful.len();
            for (index, failure) in unanswered(&receipts, &outcome) {
                let message = acknowledge[index];
                log::warn!(
                    "no delete result for message {} from {}, leaving it on the source",
                    message.message_id,
                    self.source.name
                );
                held.insert(message.message_id.clone());
                report.delete_failures.push(DeleteFailure {
                    message_id: message.message_id.clone(),
                    failure,
                });
            }
            for failure in outcome.failed {
                let Some(message) = receipts
                    .iter()
                    .position(|r| r.id == failure.id)
                    .map(|i| acknowledge[i])
                else {
                    continue;
                };
                // not retried; it reappears after the visibility timeout
                log::warn!(
                    "failed to delete message {} from {}: {failure}",
                    message.message_id,
                    self.source.name
                );
                held.insert(message.message_id.clone());
                report.delete_failures.push(DeleteFailure {
                    message_id: message.message_id.clone(),
                    failure,
                });
            }
        }

        report.transfer = sink.finish().await?;
        Ok(report)
    }
}
