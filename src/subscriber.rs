//! Subscription capability and environment-driven subscriber selection.
//!
//! [`Subscribe`] is the capability every subscriber exposes: subscribe to a
//! topic and receive a stream of messages, or close. [`Subscriber`] is the
//! configuration-driven wrapper with exactly two arms — the HTTP push
//! transport for production and the no-op fake for everything else. The arm
//! is picked once at construction from an explicit [`Environment`] flag,
//! never by runtime probing.
//!
//! ## Example
//!
//! ```ignore
//! use pubsub_subscriber::{Environment, MessageContext, Subscribe, Subscriber, SubscriberConfig};
//!
//! let subscriber = Subscriber::new(
//!     SubscriberConfig::new(Environment::Production),
//!     Box::new(move |path, route| app.register(path, route)),
//! )?; // construction failure is fatal — abort startup
//!
//! let mut messages = subscriber.subscribe(MessageContext::new(), "appointments").await?;
//! while let Some(msg) = messages.recv().await {
//!     // decode, dispatch, ack/nack — see `handle_message`
//! }
//! ```

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::fake::FakeSubscriber;
use crate::message::{Message, MessageContext};
use crate::push::{PushSubscriber, RegisterHttpHandler};

/// Stream of delivered messages for one subscription.
pub type MessageStream = mpsc::Receiver<Arc<Message>>;

/// Default capacity of a subscription's delivery channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Error type for subscription operations.
#[derive(Debug)]
pub enum SubscribeError {
    /// Configuration rejected at construction time. Fatal — the process
    /// should not continue half-initialized.
    InvalidConfig(String),
    /// The subscriber has been closed.
    Closed,
    /// Other error from the underlying transport.
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            SubscribeError::Closed => write!(f, "subscriber is closed"),
            SubscribeError::Other(e) => write!(f, "subscribe error: {}", e),
        }
    }
}

impl Error for SubscribeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SubscribeError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Capability for subscribing to topics and receiving messages.
///
/// Implementations deliver each message at least once; consumers settle every
/// delivery with exactly one of `ack()` / `nack()`.
#[async_trait]
pub trait Subscribe: Send + Sync {
    /// Subscribe to a topic. The returned stream yields messages until the
    /// subscriber is closed.
    async fn subscribe(
        &self,
        ctx: MessageContext,
        topic: &str,
    ) -> Result<MessageStream, SubscribeError>;

    /// Close the subscriber. Open streams end; no further messages are
    /// delivered.
    async fn close(&self) -> Result<(), SubscribeError>;
}

/// Which transport environment the process runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    /// Real transport: messages arrive over HTTP push delivery.
    Production,
    /// No live transport: subscriptions are accepted but never deliver.
    Local,
}

/// Configuration for [`Subscriber::new`].
#[derive(Clone, Debug)]
pub struct SubscriberConfig {
    /// Selects the push transport or the fake.
    pub environment: Environment,
    /// Capacity of each subscription's delivery channel.
    pub channel_capacity: usize,
}

impl SubscriberConfig {
    /// Config for the given environment with default channel capacity.
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self::new(Environment::Local)
    }
}

/// Configuration-driven subscriber: push transport in production, fake
/// everywhere else.
pub enum Subscriber {
    /// Transport-backed subscriber fed by HTTP push deliveries.
    Push(PushSubscriber),
    /// No-op stand-in that accepts subscriptions but never delivers.
    Fake(FakeSubscriber),
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscriber::Push(_) => f.write_str("Subscriber::Push"),
            Subscriber::Fake(_) => f.write_str("Subscriber::Fake"),
        }
    }
}

impl Subscriber {
    /// Build a subscriber for the configured environment.
    ///
    /// The `register_http_handler` callback is only invoked by the push
    /// transport (to mount delivery endpoints); the fake ignores it. An
    /// `Err` here is a fatal startup error.
    pub fn new(
        config: SubscriberConfig,
        register_http_handler: RegisterHttpHandler,
    ) -> Result<Self, SubscribeError> {
        match config.environment {
            Environment::Production => Ok(Subscriber::Push(PushSubscriber::new(
                &config,
                register_http_handler,
            )?)),
            Environment::Local => Ok(Subscriber::Fake(FakeSubscriber::new())),
        }
    }
}

#[async_trait]
impl Subscribe for Subscriber {
    async fn subscribe(
        &self,
        ctx: MessageContext,
        topic: &str,
    ) -> Result<MessageStream, SubscribeError> {
        match self {
            Subscriber::Push(s) => s.subscribe(ctx, topic).await,
            Subscriber::Fake(s) => s.subscribe(ctx, topic).await,
        }
    }

    async fn close(&self) -> Result<(), SubscribeError> {
        match self {
            Subscriber::Push(s) => s.close().await,
            Subscriber::Fake(s) => s.close().await,
        }
    }
}
