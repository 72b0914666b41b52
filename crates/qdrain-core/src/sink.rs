//! Terminal consumers of drained messages.
//!
//! The drainer hands every received message to a [`Sink`], then asks the sink
//! which of them are safe to acknowledge. Only those are deleted from the
//! source; everything else stays on the queue and becomes visible again once
//! its visibility timeout elapses.

use std::collections::HashSet;
use std::io::Write;

use crate::batch::{self, EntryId, TransferReport};
use crate::mapper::{AttributeMapper, MappingError, OutboundMessage};
use crate::message::{Message, SystemAttribute};
use crate::queue::{Queue, QueueMode};
use crate::transport::QueueTransport;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize message: {0}")]
    Json(#[from] serde_json::Error),
    #[error(
        "{} messages were deleted from the source but could not be sent to {destination}: {report}",
        .report.unsent().len()
    )]
    MessagesLost {
        destination: String,
        report: TransferReport,
    },
}

/// Whether a sink took responsibility for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// The message cannot be handled by this sink and must stay on the source.
    Rejected(MappingError),
}

#[async_trait::async_trait]
pub trait Sink: Send {
    /// Takes one message, in receipt order.
    async fn accept(&mut self, message: &Message) -> Result<Verdict, SinkError>;

    /// Ends the current batch, returning the ids of the messages accepted
    /// since the last commit that may now be deleted from the source.
    async fn commit(&mut self) -> Result<Vec<String>, SinkError>;

    /// Ends the run once the source is drained.
    async fn finish(&mut self) -> Result<Option<TransferReport>, SinkError>;
}

#[async_trait::async_trait]
impl<S: Sink + ?Sized> Sink for Box<S> {
    async fn accept(&mut self, message: &Message) -> Result<Verdict, SinkError> {
        (**self).accept(message).await
    }

    async fn commit(&mut self) -> Result<Vec<String>, SinkError> {
        (**self).commit().await
    }

    async fn finish(&mut self) -> Result<Option<TransferReport>, SinkError> {
        (**self).finish().await
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\\\""))
}

/// Writes each message as a CSV row.
///
/// Bodies have runs of whitespace collapsed into single spaces so a message
/// always occupies exactly one line; double quotes are backslash-escaped.
pub struct CsvSink<W: Write + Send> {
    writer: W,
    mode: QueueMode,
    pending: Vec<String>,
}

impl<W: Write + Send> CsvSink<W> {
    /// Creates the sink and writes the header row for a queue of `mode`.
    pub fn new(mut writer: W, mode: QueueMode) -> Result<Self, SinkError> {
        let header = match mode {
            QueueMode::Standard => "Body,Sent",
            QueueMode::Ordered => {
                "Body,Message Group ID,Message Deduplication ID,Sequence Number,Sent"
            }
        };
        writeln!(writer, "{header}")?;

        Ok(Self {
            writer,
            mode,
            pending: Vec::new(),
        })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn row(&self, message: &Message) -> String {
        let body = message.body.split_whitespace().collect::<Vec<_>>().join(" ");
        let attr = |name| quote(message.attribute(name).unwrap_or_default());

        let mut fields = vec![quote(&body)];
        if self.mode.is_ordered() {
            fields.push(attr(SystemAttribute::MessageGroupId));
            fields.push(attr(SystemAttribute::MessageDeduplicationId));
            fields.push(attr(SystemAttribute::SequenceNumber));
        }
        fields.push(attr(SystemAttribute::SentTimestamp));
        fields.join(",")
    }
}

#[async_trait::async_trait]
impl<W: Write + Send> Sink for CsvSink<W> {
    async fn accept(&mut self, message: &Message) -> Result<Verdict, SinkError> {
        let row = self.row(message);
        writeln!(self.writer, "{row}")?;
        self.pending.push(message.message_id.clone());
        Ok(Verdict::Accepted)
    }

    async fn commit(&mut self) -> Result<Vec<String>, SinkError> {
        // rows must be out before their messages are deleted
        self.writer.flush()?;
        Ok(std::mem::take(&mut self.pending))
    }

    async fn finish(&mut self) -> Result<Option<TransferReport>, SinkError> {
        self.writer.flush()?;
        Ok(None)
    }
}

/// Writes each message as one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    pending: Vec<String>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pending: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait::async_trait]
impl<W: Write + Send> Sink for JsonLinesSink<W> {
    async fn accept(&mut self, message: &Message) -> Result<Verdict, SinkError> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.pending.push(message.message_id.clone());
        Ok(Verdict::Accepted)
    }

    async fn commit(&mut self) -> Result<Vec<String>, SinkError> {
        self.writer.flush()?;
        Ok(std::mem::take(&mut self.pending))
    }

    async fn finish(&mut self) -> Result<Option<TransferReport>, SinkError> {
        self.writer.flush()?;
        Ok(None)
    }
}

/// When messages are written to the destination relative to their deletion
/// from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPolicy {
    /// Each batch is deleted from the source as soon as it is staged, and
    /// everything staged is sent once the source is empty. A failed send at
    /// that point loses the message.
    DeferredSend,
    /// Each batch is sent before it is deleted, and only messages the
    /// destination confirmed are deleted. Nothing is lost; failed messages
    /// stay on the source.
    ConfirmedSend,
}

/// Transfers drained messages into another queue.
pub struct QueueSink<'a, T: QueueTransport + ?Sized> {
    transport: &'a T,
    destination: &'a Queue,
    mapper: AttributeMapper,
    policy: TransferPolicy,
    pending: Vec<OutboundMessage>,
    staged: Vec<OutboundMessage>,
    report: TransferReport,
    next_entry: usize,
}

impl<'a, T: QueueTransport + ?Sized> QueueSink<'a, T> {
    pub fn new(
        transport: &'a T,
        destination: &'a Queue,
        mapper: AttributeMapper,
        policy: TransferPolicy,
    ) -> Self {
        Self {
            transport,
            destination,
            mapper,
            policy,
            pending: Vec::new(),
            staged: Vec::new(),
            report: TransferReport::default(),
            next_entry: 0,
        }
    }
}

#[async_trait::async_trait]
impl<'a, T: QueueTransport + ?Sized> Sink for QueueSink<'a, T> {
    async fn accept(&mut self, message: &Message) -> Result<Verdict, SinkError> {
        let id = EntryId::for_index(self.next_entry);
        match self.mapper.map(message, self.destination.mode, id) {
            Ok(outbound) => {
                self.next_entry += 1;
                self.pending.push(outbound);
                Ok(Verdict::Accepted)
            }
            Err(e) => Ok(Verdict::Rejected(e)),
        }
    }

    async fn commit(&mut self) -> Result<Vec<String>, SinkError> {
        let pending = std::mem::take(&mut self.pending);
        match self.policy {
            TransferPolicy::DeferredSend => {
                let ids = pending.iter().map(|m| m.source_message_id.clone()).collect();
                self.staged.extend(pending);
                Ok(ids)
            }
            TransferPolicy::ConfirmedSend => {
                let report =
                    batch::send_all(self.transport, &self.destination.url, &pending).await;
                let sent = report.sent.clone();
                self.report.merge(report);
                Ok(sent)
            }
        }
    }

    async fn finish(&mut self) -> Result<Option<TransferReport>, SinkError> {
        if self.policy == TransferPolicy::DeferredSend {
            let staged = std::mem::take(&mut self.staged);
            log::debug!(
                "sending {} staged messages to {}",
                staged.len(),
                self.destination.name
            );
            let report = batch::send_all(self.transport, &self.destination.url, &staged).await;
            if !report.is_complete() {
                for id in report.unsent() {
                    log::error!("message {id} was removed from the source and not re-sent");
                }
                return Err(SinkError::MessagesLost {
                    destination: self.destination.name.clone(),
                    report,
                });
            }
            self.report.merge(report);
        }

        Ok(Some(std::mem::take(&mut self.report)))
    }
}

/// Feeds one drained stream into two sinks.
///
/// A message is only confirmed when both sinks confirm it.
pub struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: Sink, B: Sink> Tee<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn into_inner(self) -> (A, B) {
        (self.first, self.second)
    }
}

#[async_trait::async_trait]
impl<A: Sink, B: Sink> Sink for Tee<A, B> {
    async fn accept(&mut self, message: &Message) -> Result<Verdict, SinkError> {
        match self.first.accept(message).await? {
            Verdict::Accepted => self.second.accept(message).await,
            rejected => Ok(rejected),
        }
    }

    async fn commit(&mut self) -> Result<Vec<String>, SinkError> {
        let first = self.first.commit().await?;
        let second: HashSet<String> = self.second.commit().await?.into_iter().collect();
        Ok(first.into_iter().filter(|id| second.contains(id)).collect())
    }

    async fn finish(&mut self) -> Result<Option<TransferReport>, SinkError> {
        let first = self.first.finish().await?;
        let second = self.second.finish().await?;
        Ok(match (first, second) {
            (Some(mut a), Some(b)) => {
                a.merge(b);
                Some(a)
            }
            (a, b) => a.or(b),
        })
    }
}
