//! In-memory queue service for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::batch::EntryId;
use crate::mapper::OutboundMessage;
use crate::message::{Message, SystemAttribute};
use crate::queue::{Queue, QueueMode};
use crate::transport::{
    BatchOutcome, ItemFailure, QueueTransport, Receipt, TransportError, MAX_BATCH,
};

pub fn standard_message(id: &str, body: &str, sent: &str) -> Message {
    Message::new(id, format!("receipt-{id}"), body).with_attribute(SystemAttribute::SentTimestamp, sent)
}

pub fn fifo_message(id: &str, body: &str, group: &str, dedup: &str, seq: &str, sent: &str) -> Message {
    standard_message(id, body, sent)
        .with_attribute(SystemAttribute::MessageGroupId, group)
        .with_attribute(SystemAttribute::MessageDeduplicationId, dedup)
        .with_attribute(SystemAttribute::SequenceNumber, seq)
        .with_attribute(SystemAttribute::SenderId, "AIDATEST")
        .with_attribute(SystemAttribute::ApproximateFirstReceiveTimestamp, sent)
        .with_attribute(SystemAttribute::ApproximateReceiveCount, "1")
}

pub fn outbound(index: usize, body: &str) -> OutboundMessage {
    OutboundMessage {
        id: EntryId::for_index(index),
        source_message_id: format!("src-{index}"),
        body: body.to_string(),
        delay_seconds: Some(1),
        group_id: None,
        deduplication_id: None,
        attributes: Default::default(),
    }
}

struct MemoryQueue {
    mode: QueueMode,
    visible: VecDeque<Message>,
    /// Received but not yet deleted, keyed by receipt handle
    in_flight: HashMap<String, Message>,
    seen_dedup_ids: HashSet<String>,
    sequence: u64,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, MemoryQueue>,
    next_id: u64,
    mode_lookups: usize,
    send_calls: usize,
    failing_send_calls: HashSet<usize>,
    rejected_bodies: HashSet<String>,
    undeletable: HashSet<String>,
    unanswered: HashSet<String>,
    fail_delete_calls: bool,
    fail_receive: bool,
    expire_on_receive: bool,
}

/// A queue service kept in memory.
///
/// Visibility timeouts never expire on their own; call
/// [`MemoryTransport::expire_visibility`] to make in-flight messages
/// receivable again.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url_of(name: &str) -> String {
        format!("memory://queues/{name}")
    }

    pub fn create_queue(&self, name: &str, mode: QueueMode) -> String {
        let mut state = self.state.lock().unwrap();
        state.queues.insert(
            Self::url_of(name),
            MemoryQueue {
                mode,
                visible: VecDeque::new(),
                in_flight: HashMap::new(),
                seen_dedup_ids: HashSet::new(),
                sequence: 0,
            },
        );
        Self::url_of(name)
    }

    pub async fn open(&self, name: &str, mode: QueueMode) -> Queue {
        self.create_queue(name, mode);
        Queue::open(self, name).await.unwrap()
    }

    /// Puts a message on a queue as if a producer had sent it.
    pub fn produce(&self, name: &str, body: &str, group: Option<&str>) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("msg-{}", state.next_id);
        let queue = state.queues.get_mut(&Self::url_of(name)).unwrap();
        queue.sequence += 1;

        let mut message = Message::new(id.clone(), "", body)
            .with_attribute(SystemAttribute::SentTimestamp, format!("{}", 1_700_000_000_000u64 + queue.sequence))
            .with_attribute(SystemAttribute::SenderId, "AIDATEST");
        if queue.mode.is_ordered() {
            message = message
                .with_attribute(SystemAttribute::MessageGroupId, group.unwrap_or("default"))
                .with_attribute(SystemAttribute::MessageDeduplicationId, format!("dedup-{id}"))
                .with_attribute(SystemAttribute::SequenceNumber, queue.sequence.to_string());
        }
        queue.visible.push_back(message);
        id
    }

    /// Puts an already built message on a queue, attributes untouched.
    pub fn produce_raw(&self, name: &str, message: Message) {
        let mut state = self.state.lock().unwrap();
        let queue = state.queues.get_mut(&Self::url_of(name)).unwrap();
        queue.visible.push_back(message);
    }

    /// Makes every in-flight message visible again.
    pub fn expire_visibility(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let queue = state.queues.get_mut(&Self::url_of(name)).unwrap();
        let expired: Vec<Message> = queue.in_flight.drain().map(|(_, m)| m).collect();
        queue.visible.extend(expired);
    }

    /// Every message on the queue, visible or in flight.
    pub fn messages(&self, name: &str) -> Vec<Message> {
        let state = self.state.lock().unwrap();
        let queue = &state.queues[&Self::url_of(name)];
        queue
            .visible
            .iter()
            .chain(queue.in_flight.values())
            .cloned()
            .collect()
    }

    pub fn bodies(&self, name: &str) -> Vec<String> {
        self.messages(name).into_iter().map(|m| m.body).collect()
    }

    pub fn mode_lookups(&self) -> usize {
        self.state.lock().unwrap().mode_lookups
    }

    pub fn send_calls(&self) -> usize {
        self.state.lock().unwrap().send_calls
    }

    /// Makes the `n`-th send call (zero based) fail as a whole.
    pub fn fail_send_call(&self, n: usize) {
        self.state.lock().unwrap().failing_send_calls.insert(n);
    }

    /// Refuses any sent entry with this body.
    pub fn reject_body(&self, body: &str) {
        self.state.lock().unwrap().rejected_bodies.insert(body.to_string());
    }

    /// Refuses to delete the message with this id.
    pub fn fail_delete_of(&self, message_id: &str) {
        self.state.lock().unwrap().undeletable.insert(message_id.to_string());
    }

    /// Leaves the message with this id out of both lists of the delete
    /// outcome, without deleting it.
    pub fn omit_delete_result_of(&self, message_id: &str) {
        self.state.lock().unwrap().unanswered.insert(message_id.to_string());
    }

    pub fn fail_delete_calls(&self) {
        self.state.lock().unwrap().fail_delete_calls = true;
    }

    /// Returns in-flight messages to the queue before every receive, as if
    /// their visibility timeout had elapsed.
    pub fn expire_on_receive(&self) {
        self.state.lock().unwrap().expire_on_receive = true;
    }

    pub fn fail_receive(&self) {
        self.state.lock().unwrap().fail_receive = true;
    }
}

#[async_trait::async_trait]
impl QueueTransport for MemoryTransport {
    async fn resolve(&self, name: &str) -> Result<String, TransportError> {
        let url = Self::url_of(name);
        if self.state.lock().unwrap().queues.contains_key(&url) {
            Ok(url)
        } else {
            Err(TransportError::Resolve {
                name: name.to_string(),
                reason: "AWS.SimpleQueueService.NonExistentQueue".to_string(),
            })
        }
    }

    async fn mode(&self, url: &str) -> Result<QueueMode, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.mode_lookups += 1;
        state
            .queues
            .get(url)
            .map(|q| q.mode)
            .ok_or_else(|| TransportError::Attributes {
                url: url.to_string(),
                reason: "no such queue".to_string(),
            })
    }

    async fn receive(&self, url: &str, max: usize) -> Result<Vec<Message>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_receive {
            return Err(TransportError::Receive {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        state.next_id += 1;
        let receive_id = state.next_id;
        let expire = state.expire_on_receive;
        let queue = state.queues.get_mut(url).unwrap();
        if expire {
            let mut expired: Vec<Message> = queue.in_flight.drain().map(|(_, m)| m).collect();
            expired.sort_by(|a, b| a.message_id.cmp(&b.message_id));
            queue.visible.extend(expired);
        }

        let mut received = Vec::new();
        while received.len() < max.min(MAX_BATCH) {
            let Some(mut message) = queue.visible.pop_front() else {
                break;
            };
            let count = message
                .attribute(SystemAttribute::ApproximateReceiveCount)
                .and_then(|c| c.parse::<u64>().ok())
                .unwrap_or(0);
            if message
                .attribute(SystemAttribute::ApproximateFirstReceiveTimestamp)
                .is_none()
            {
                message = message.with_attribute(
                    SystemAttribute::ApproximateFirstReceiveTimestamp,
                    (1_750_000_000_000u64 + receive_id).to_string(),
                );
            }
            message = message.with_attribute(SystemAttribute::ApproximateReceiveCount, (count + 1).to_string());
            message.receipt_handle = format!("receipt-{}-{}", message.message_id, receive_id);
            queue
                .in_flight
                .insert(message.receipt_handle.clone(), message.clone());
            received.push(message);
        }
        Ok(received)
    }

    async fn delete_batch(
        &self,
        url: &str,
        receipts: &[Receipt],
    ) -> Result<BatchOutcome, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete_calls {
            return Err(TransportError::Delete {
                url: url.to_string(),
                reason: "throttled".to_string(),
            });
        }
        let undeletable = state.undeletable.clone();
        let unanswered = state.unanswered.clone();
        let queue = state.queues.get_mut(url).unwrap();

        let mut outcome = BatchOutcome::default();
        for receipt in receipts {
            let silent = queue
                .in_flight
                .get(&receipt.receipt_handle)
                .is_some_and(|m| unanswered.contains(&m.message_id));
            if silent {
                continue;
            }
            let deletable = queue
                .in_flight
                .get(&receipt.receipt_handle)
                .map(|m| !undeletable.contains(&m.message_id));
            match deletable {
                Some(true) => {
                    queue.in_flight.remove(&receipt.receipt_handle);
                    outcome.successful.push(receipt.id.clone());
                }
                _ => outcome.failed.push(ItemFailure {
                    id: receipt.id.clone(),
                    code: "ReceiptHandleIsInvalid".to_string(),
                    message: None,
                    sender_fault: true,
                }),
            }
        }
        Ok(outcome)
    }

    async fn send_batch(
        &self,
        url: &str,
        messages: &[OutboundMessage],
    ) -> Result<BatchOutcome, TransportError> {
        let mut state = self.state.lock().unwrap();
        let call = state.send_calls;
        state.send_calls += 1;
        if state.failing_send_calls.contains(&call) {
            return Err(TransportError::Send {
                url: url.to_string(),
                reason: "service unavailable".to_string(),
            });
        }
        assert!(messages.len() <= MAX_BATCH, "batch over the per-call limit");

        let rejected_bodies = state.rejected_bodies.clone();
        state.next_id += 1;
        let base = state.next_id;
        let queue = state.queues.get_mut(url).unwrap();

        let mut outcome = BatchOutcome::default();
        for (i, outbound) in messages.iter().enumerate() {
            let invalid = if rejected_bodies.contains(&outbound.body) {
                Some("InvalidMessageContents")
            } else if queue.mode.is_ordered()
                && (outbound.group_id.is_none() || outbound.deduplication_id.is_none())
            {
                Some("MissingParameter")
            } else if !queue.mode.is_ordered() && outbound.group_id.is_some() {
                Some("InvalidParameterValue")
            } else {
                None
            };
            if let Some(code) = invalid {
                outcome.failed.push(ItemFailure {
                    id: outbound.id.clone(),
                    code: code.to_string(),
                    message: None,
                    sender_fault: true,
                });
                continue;
            }
            outcome.successful.push(outbound.id.clone());

            if let Some(dedup) = &outbound.deduplication_id {
                // collapsed inside the deduplication window
                if !queue.seen_dedup_ids.insert(dedup.clone()) {
                    continue;
                }
            }

            queue.sequence += 1;
            let mut message = Message::new(format!("msg-{base}-{i}"), "", outbound.body.clone())
                .with_attribute(SystemAttribute::SentTimestamp, (1_800_000_000_000u64 + queue.sequence).to_string())
                .with_attribute(SystemAttribute::SenderId, "AIDATEST");
            if let (Some(group), Some(dedup)) = (&outbound.group_id, &outbound.deduplication_id) {
                message = message
                    .with_attribute(SystemAttribute::MessageGroupId, group.clone())
                    .with_attribute(SystemAttribute::MessageDeduplicationId, dedup.clone())
                    .with_attribute(SystemAttribute::SequenceNumber, queue.sequence.to_string());
            }
            queue.visible.push_back(message);
        }
        Ok(outcome)
    }

    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, TransportError> {
        let state = self.state.lock().unwrap();
        let base = Self::url_of("");
        let mut urls: Vec<String> = state
            .queues
            .keys()
            .filter(|url| {
                url.strip_prefix(&base)
                    .is_some_and(|name| name.starts_with(prefix.unwrap_or("")))
            })
            .cloned()
            .collect();
        urls.sort();
        Ok(urls)
    }
}
