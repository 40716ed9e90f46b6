//! HTTP push transport — turns broker push deliveries into messages.
//!
//! The push transport does not dial the broker; the broker POSTs each
//! delivery to an endpoint the application exposes. On `subscribe`, a
//! delivery route is mounted through the caller-supplied
//! [`RegisterHttpHandler`] callback and each well-formed push envelope
//! becomes a [`Message`] on the subscription's stream. The HTTP response is
//! derived from the message's terminal signal:
//!
//! - ack → `200 OK` (the broker drops the message)
//! - nack → `503 Service Unavailable` (the broker redelivers)
//! - dropped unsettled / subscriber closed → `503`
//!
//! ## Push envelope
//!
//! ```json
//! {
//!   "message": {
//!     "data": "<base64 payload>",
//!     "messageId": "m-1",
//!     "attributes": { "traceparent": "00-..-..-01" }
//!   },
//!   "subscription": "projects/p/subscriptions/s"
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{post, MethodRouter};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::message::{Message, MessageContext, Receipt};
use crate::subscriber::{MessageStream, Subscribe, SubscribeError, SubscriberConfig};

use async_trait::async_trait;

/// Callback used to mount a delivery endpoint on the application's HTTP
/// server. Called once per subscription with the route path and handler.
pub type RegisterHttpHandler = Box<dyn FnMut(&str, MethodRouter) + Send>;

/// Wire format of a push delivery.
#[derive(Deserialize)]
struct PushEnvelope {
    message: PushMessage,
    #[serde(default)]
    #[allow(dead_code)]
    subscription: String,
}

#[derive(Deserialize)]
struct PushMessage {
    #[serde(default)]
    data: String,
    #[serde(default, rename = "messageId")]
    message_id: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

/// Per-subscription delivery state shared with the mounted route.
struct Delivery {
    tx: Mutex<Option<mpsc::Sender<Arc<Message>>>>,
    ctx: MessageContext,
    closed: CancellationToken,
}

/// Transport-backed subscriber fed by HTTP push deliveries.
pub struct PushSubscriber {
    register: Mutex<RegisterHttpHandler>,
    channel_capacity: usize,
    closed: CancellationToken,
    subscriptions: Mutex<Vec<Arc<Delivery>>>,
}

impl PushSubscriber {
    /// Build the push transport. Fails on invalid configuration; the caller
    /// treats that as a fatal startup error.
    pub fn new(
        config: &SubscriberConfig,
        register_http_handler: RegisterHttpHandler,
    ) -> Result<Self, SubscribeError> {
        if config.channel_capacity == 0 {
            return Err(SubscribeError::InvalidConfig(
                "channel_capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            register: Mutex::new(register_http_handler),
            channel_capacity: config.channel_capacity,
            closed: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Route path for a topic's delivery endpoint.
    fn delivery_path(topic: &str) -> String {
        format!("/pubsub/{}", topic)
    }
}

#[async_trait]
impl Subscribe for PushSubscriber {
    async fn subscribe(
        &self,
        ctx: MessageContext,
        topic: &str,
    ) -> Result<MessageStream, SubscribeError> {
        if self.closed.is_cancelled() {
            return Err(SubscribeError::Closed);
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let delivery = Arc::new(Delivery {
            tx: Mutex::new(Some(tx)),
            ctx,
            closed: self.closed.clone(),
        });
        self.subscriptions.lock().unwrap().push(Arc::clone(&delivery));

        let path = Self::delivery_path(topic);
        let route = post(deliver).with_state(delivery);
        let mut register = self.register.lock().unwrap();
        (*register)(&path, route);
        drop(register);

        tracing::debug!(topic, path, "mounted push delivery endpoint");
        Ok(rx)
    }

    async fn close(&self) -> Result<(), SubscribeError> {
        self.closed.cancel();
        // Dropping the senders ends every subscription stream; the mounted
        // routes keep answering 503 so the broker retries elsewhere.
        for delivery in self.subscriptions.lock().unwrap().drain(..) {
            delivery.tx.lock().unwrap().take();
        }
        tracing::debug!("push subscriber closed");
        Ok(())
    }
}

/// `POST /pubsub/{topic}` — accept one push delivery.
async fn deliver(
    State(delivery): State<Arc<Delivery>>,
    Json(envelope): Json<PushEnvelope>,
) -> StatusCode {
    if delivery.closed.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    let payload = match BASE64.decode(envelope.message.data.as_bytes()) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "push delivery with undecodable data field");
            return StatusCode::BAD_REQUEST;
        }
    };

    let uuid = if envelope.message.message_id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        envelope.message.message_id
    };

    let (mut msg, receipt) = Message::new(uuid, payload);
    for (key, value) in envelope.message.attributes {
        msg = msg.with_metadata(key, value);
    }
    msg.set_context(delivery.ctx.clone());

    let tx = delivery.tx.lock().unwrap().clone();
    let Some(tx) = tx else {
        return StatusCode::SERVICE_UNAVAILABLE;
    };
    if tx.send(Arc::new(msg)).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    match receipt.receipt().await {
        Some(Receipt::Ack) => StatusCode::OK,
        Some(Receipt::Nack) | None => StatusCode::SERVICE_UNAVAILABLE,
    }
}
