//! Seam between the transport engine and the owning client runtime
//!
//! The transport never talks to application code directly: every device is
//! registered together with a [`ClientRuntime`] implementation, and all
//! asynchronous outcomes (delivery confirmations, received commands) flow
//! through it. The runtime, in turn, drives the engine by calling
//! `do_work` once per cooperative cycle.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use iothub_message::Message;
use parking_lot::Mutex;

/// Outcome reported for a batch of completed outbound messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResult {
    /// Accepted by the hub (HTTP status < 300)
    Ok,
    /// Failed permanently (e.g. over the size limit); will not be retried
    Error,
}

/// Verdict the runtime returns for a polled command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Complete the command (DELETE)
    Accepted,
    /// Dead-letter the command (DELETE with the reject marker)
    Rejected,
    /// Return the command to the queue for redelivery (POST /abandon)
    Abandoned,
}

/// Whether a device currently has queued outbound work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Idle,
    Busy,
}

/// One entry in a device's outbound queue
///
/// The `context` travels untouched through the engine and comes back with
/// the confirmation, so the runtime can correlate completions with whatever
/// bookkeeping it keeps per message.
pub struct QueuedMessage {
    pub message: Message,
    pub context: Option<Box<dyn Any>>,
}

impl QueuedMessage {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            context: None,
        }
    }

    pub fn with_context(message: Message, context: Box<dyn Any>) -> Self {
        Self {
            message,
            context: Some(context),
        }
    }
}

impl std::fmt::Debug for QueuedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedMessage")
            .field("message", &self.message)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

/// The outbound FIFO a device shares with the transport
///
/// The queue is created and owned by the caller; the engine only pops from
/// the front while batching and pushes entries back at the front when a
/// send must be retried. Nothing else may mutate it during `do_work`.
pub type SendQueue = Arc<Mutex<VecDeque<QueuedMessage>>>;

/// Create an empty outbound queue
pub fn send_queue() -> SendQueue {
    Arc::new(Mutex::new(VecDeque::new()))
}

/// Callbacks the owning client runtime supplies per registered device
pub trait ClientRuntime {
    /// Delivery outcome for a set of messages removed from the send queue
    ///
    /// `completed` preserves queue order. With `ConfirmationResult::Ok`
    /// every message was part of a request the hub accepted; with
    /// `Error` the messages failed permanently and were dropped from the
    /// queue.
    fn send_complete(&self, completed: Vec<QueuedMessage>, result: ConfirmationResult);

    /// A command addressed to the device was polled from the hub
    ///
    /// The returned [`Disposition`] decides how the engine settles the
    /// command with the service.
    fn message_received(&self, message: Message) -> Disposition;
}
