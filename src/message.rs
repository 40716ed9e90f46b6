//! Message envelope delivered by a subscription.
//!
//! A [`Message`] carries a unique id, an opaque binary payload, string
//! metadata (trace headers such as `traceparent` travel here), and a
//! [`MessageContext`]. It is settled by exactly one terminal signal:
//! [`Message::ack`] or [`Message::nack`]. The first call wins; the transport
//! observes the outcome through the [`ReceiptReceiver`] returned at
//! construction.
//!
//! ## Example
//!
//! ```
//! use pubsub_subscriber::{Message, Receipt};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let (msg, receipt) = Message::new("msg-1", b"payload".to_vec());
//!
//! assert!(msg.ack());
//! assert!(!msg.nack()); // already settled, no-op
//!
//! assert_eq!(receipt.receipt().await, Some(Receipt::Ack));
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use opentelemetry::Context as TraceContext;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Terminal outcome of message processing, as seen by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Receipt {
    /// Successfully processed — do not redeliver.
    Ack,
    /// Processing failed — request redelivery.
    Nack,
}

/// Context carried by a message and forwarded to handlers unchanged.
///
/// Bundles the propagated trace context with a cancellation token. This
/// layer implements no timeouts of its own; handlers are expected to honor
/// the token.
#[derive(Clone, Default)]
pub struct MessageContext {
    trace: TraceContext,
    cancellation: CancellationToken,
}

impl MessageContext {
    /// Create an empty context (no trace parent, fresh cancellation token).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context tied to the given cancellation token.
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            trace: TraceContext::default(),
            cancellation,
        }
    }

    /// Replace the trace context (used by the extraction middleware).
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    /// The propagated trace context.
    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    /// The cancellation token for this message's processing.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether processing has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A message delivered by a subscription.
///
/// Consumed exactly once: whoever processes it must call exactly one of
/// `ack()` or `nack()` before letting it go. Both are idempotent after the
/// first terminal call.
pub struct Message {
    uuid: String,
    payload: Vec<u8>,
    metadata: HashMap<String, String>,
    context: Mutex<MessageContext>,
    receipt: Mutex<Option<oneshot::Sender<Receipt>>>,
}

impl Message {
    /// Create a message and the receiver on which the transport awaits the
    /// terminal signal.
    pub fn new(uuid: impl Into<String>, payload: Vec<u8>) -> (Self, ReceiptReceiver) {
        let (tx, rx) = oneshot::channel();
        let msg = Self {
            uuid: uuid.into(),
            payload,
            metadata: HashMap::new(),
            context: Mutex::new(MessageContext::new()),
            receipt: Mutex::new(Some(tx)),
        };
        (msg, ReceiptReceiver(rx))
    }

    /// Add a metadata entry to the message.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Unique identifier assigned by the transport.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The opaque binary payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// All metadata entries.
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Look up a single metadata value.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// A clone of the message's current context.
    pub fn context(&self) -> MessageContext {
        self.context.lock().unwrap().clone()
    }

    /// Replace the message's context (used by router middleware).
    pub fn set_context(&self, context: MessageContext) {
        *self.context.lock().unwrap() = context;
    }

    /// Signal successful processing. Returns `true` if this call settled the
    /// message, `false` if it was already settled.
    pub fn ack(&self) -> bool {
        self.settle(Receipt::Ack)
    }

    /// Signal failed processing and request redelivery. Returns `true` if
    /// this call settled the message, `false` if it was already settled.
    pub fn nack(&self) -> bool {
        self.settle(Receipt::Nack)
    }

    fn settle(&self, receipt: Receipt) -> bool {
        match self.receipt.lock().unwrap().take() {
            // The transport side may be gone (e.g. delivery timed out); the
            // message still counts as settled by this call.
            Some(tx) => {
                let _ = tx.send(receipt);
                true
            }
            None => false,
        }
    }
}

/// Receiving side of a message's terminal signal.
///
/// Held by the transport that produced the message. Resolves once `ack()` or
/// `nack()` is called on the corresponding [`Message`].
pub struct ReceiptReceiver(oneshot::Receiver<Receipt>);

impl ReceiptReceiver {
    /// Wait for the terminal signal. Returns `None` if the message was
    /// dropped without being settled.
    pub async fn receipt(self) -> Option<Receipt> {
        self.0.await.ok()
    }
}
