//! No-op subscriber for non-production environments.
//!
//! Satisfies [`Subscribe`] without a live transport: subscriptions are
//! accepted for any topic but never deliver a message, and `close` always
//! succeeds. This lets the surrounding application wire up identical code
//! paths locally without broker credentials or connectivity.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::{Message, MessageContext};
use crate::subscriber::{MessageStream, Subscribe, SubscribeError};

/// Subscriber that accepts subscriptions but never delivers messages.
#[derive(Default)]
pub struct FakeSubscriber {
    // Senders are retained so returned streams stay open (pending forever)
    // instead of ending immediately. `close` releases them.
    open: Mutex<Vec<mpsc::Sender<Arc<Message>>>>,
}

impl FakeSubscriber {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Subscribe for FakeSubscriber {
    async fn subscribe(
        &self,
        _ctx: MessageContext,
        topic: &str,
    ) -> Result<MessageStream, SubscribeError> {
        let (tx, rx) = mpsc::channel(1);
        self.open.lock().unwrap().push(tx);
        tracing::debug!(topic, "fake subscription opened, no messages will be delivered");
        Ok(rx)
    }

    async fn close(&self) -> Result<(), SubscribeError> {
        self.open.lock().unwrap().clear();
        Ok(())
    }
}
