//! # qdrain-core
//!
//! Core library for draining AWS SQS queues.
//!
//! Messages are received in batches, handed to a sink, and acknowledged once
//! the sink has taken responsibility for them. Sinks either render the
//! messages (CSV or JSON lines) or transfer them into another queue, keeping
//! the ordering metadata of FIFO queues intact.
//!
//! ## Features
//!
//! - **Draining**: receive until the queue reports empty, acknowledging in batches
//! - **Rendering**: CSV rows with a header suited to the queue type
//! - **Redrive**: move every message into another queue, with fresh
//!   deduplication ids for FIFO destinations
//! - **Queue listing**: list the SQS queues in an AWS account
//!
//! Delivery is at-least-once. A message that fails to be deleted stays on the
//! source and will be drained again by a later run.
//!
//! ## Example
//!
//! ```no_run
//! use qdrain::{CsvSink, Drainer, Queue, Settings, SqsTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env(None, None)?;
//! let transport = SqsTransport::from_config(settings.load().await);
//!
//! let queue = Queue::open(&transport, "my-dlq").await?;
//! let mut sink = CsvSink::new(std::io::stdout(), queue.mode)?;
//!
//! let report = Drainer::new(&transport, &queue).run(&mut sink).await?;
//! eprintln!("{report}");
//! # Ok(())
//! # }
//! ```

mod batch;
mod config;
mod dedup;
mod drain;
mod mapper;
mod message;
mod queue;
mod sink;
mod sqs;
mod transport;

#[cfg(test)]
mod test_utils;

pub use batch::{chunk, send_all, ChunkFailure, EntryId, EntryIdError, RejectedEntry, TransferReport};
pub use config::{ConfigError, Settings, DEFAULT_REGION};
pub use dedup::new_deduplication_id;
pub use drain::{DeleteFailure, DrainError, DrainReport, DrainState, Drainer, ItemError};
pub use mapper::{AttributeMapper, MappingError, OutboundMessage, DEFAULT_DELAY_SECONDS};
pub use message::{Message, Ordering, SystemAttribute};
pub use queue::{Queue, QueueMode};
pub use sink::{CsvSink, JsonLinesSink, QueueSink, Sink, SinkError, Tee, TransferPolicy, Verdict};
pub use sqs::SqsTransport;
pub use transport::{
    BatchOutcome, ItemFailure, QueueTransport, Receipt, TransportError, MAX_BATCH,
    VISIBILITY_TIMEOUT_SECS,
};
