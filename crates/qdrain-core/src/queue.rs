use crate::transport::{QueueTransport, TransportError};

/// Ordering mode of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueMode {
    Standard,
    /// FIFO queue: per-group ordering, every message carries a group id,
    /// deduplication id and sequence number.
    Ordered,
}

impl QueueMode {
    pub fn is_ordered(&self) -> bool {
        matches!(self, QueueMode::Ordered)
    }
}

/// A resolved queue.
///
/// The ordering mode is looked up once when the queue is opened and assumed
/// not to change for the rest of the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Queue {
    pub name: String,
    pub url: String,
    pub mode: QueueMode,
}

impl Queue {
    pub async fn open<T: QueueTransport + ?Sized>(
        transport: &T,
        name: &str,
    ) -> Result<Self, TransportError> {
        let url = transport.resolve(name).await?;
        let mode = transport.mode(&url).await?;
        log::debug!("opened queue {name} at {url} ({mode:?})");

        Ok(Self {
            name: name.to_string(),
            url,
            mode,
        })
    }

    pub fn is_ordered(&self) -> bool {
        self.mode.is_ordered()
    }
}
