//! Message router — dispatches subscribed messages through a middleware
//! chain to named handlers.
//!
//! ## Architecture
//!
//! ```text
//! subscriber.subscribe(topic) ──► delivery pump (one per handler)
//!                                      │
//!                                      ▼
//!                        middleware chain (in add order)
//!                        extract parent ──► start span ──► handler
//!                                      │
//!                                      ▼
//!                         Ok → ack        Err → nack
//! ```
//!
//! Middlewares run in the order they were added. [`init_traced_router`]
//! installs the two tracing middlewares in their mandatory order: the
//! remote parent must be extracted before the processing span is opened,
//! otherwise the span cannot be parented to the producer's trace.
//!
//! Auto ack/nack after the wrapped handler returns is a no-op when the
//! handler already settled the message itself (e.g. via
//! [`handle_message`](crate::handle_message)).

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinSet;

use crate::message::{Message, MessageContext};
use crate::middleware::{ExtractRemoteParentContext, Trace};
use crate::subscriber::{Subscribe, SubscribeError};

/// Error type for router handlers.
#[derive(Debug)]
pub enum HandlerError {
    /// The handler rejected the message (transient — redelivery requested).
    Rejected(String),
    /// Other error.
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Rejected(msg) => write!(f, "rejected: {}", msg),
            HandlerError::Other(e) => write!(f, "handler error: {}", e),
        }
    }
}

impl Error for HandlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HandlerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Error type for router construction and runtime.
#[derive(Debug)]
pub enum RouterError {
    /// Configuration rejected at construction time. Fatal at startup.
    InvalidConfig(String),
    /// Subscribing a handler's topic failed.
    Subscribe(SubscribeError),
    /// Delivery pumps did not drain within the configured close timeout.
    CloseTimeout,
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::InvalidConfig(msg) => write!(f, "invalid router config: {}", msg),
            RouterError::Subscribe(e) => write!(f, "subscribe failed: {}", e),
            RouterError::CloseTimeout => write!(f, "router close timed out"),
        }
    }
}

impl Error for RouterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RouterError::Subscribe(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SubscribeError> for RouterError {
    fn from(err: SubscribeError) -> Self {
        RouterError::Subscribe(err)
    }
}

/// A boxed message handler, as stored and wrapped by the router.
pub type HandlerFn =
    Arc<dyn Fn(Arc<Message>) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Cross-cutting behavior applied to every message flowing through the
/// router. A middleware wraps the next handler in the chain.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: HandlerFn) -> HandlerFn;
}

/// Router configuration.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// How long `run` waits for in-flight messages after cancellation.
    pub close_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(30),
        }
    }
}

impl RouterConfig {
    fn validate(&self) -> Result<(), RouterError> {
        if self.close_timeout.is_zero() {
            return Err(RouterError::InvalidConfig(
                "close_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

struct HandlerEntry {
    name: String,
    topic: String,
    handler: HandlerFn,
}

/// Dispatches subscribed messages to named handlers through an ordered
/// middleware chain.
pub struct Router {
    config: RouterConfig,
    middlewares: Vec<Arc<dyn Middleware>>,
    handlers: Vec<HandlerEntry>,
}

impl Router {
    /// Create a router. Invalid configuration is a fatal startup error.
    pub fn new(config: RouterConfig) -> Result<Self, RouterError> {
        config.validate()?;
        Ok(Self {
            config,
            middlewares: Vec::new(),
            handlers: Vec::new(),
        })
    }

    /// Append a middleware. Middlewares execute in the order they were
    /// added, outermost first.
    pub fn add_middleware(&mut self, middleware: impl Middleware + 'static) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Register a handler for a topic. `name` identifies the handler in
    /// logs.
    pub fn add_handler<F, Fut>(&mut self, name: impl Into<String>, topic: impl Into<String>, handler: F)
    where
        F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handlers.push(HandlerEntry {
            name: name.into(),
            topic: topic.into(),
            handler: Arc::new(move |msg| -> BoxFuture<'static, Result<(), HandlerError>> {
                Box::pin(handler(msg))
            }),
        });
    }

    /// Wrap a handler in the middleware chain, first-added outermost.
    fn wrapped(&self, handler: HandlerFn) -> HandlerFn {
        self.middlewares
            .iter()
            .rev()
            .fold(handler, |next, mw| mw.wrap(next))
    }

    /// Subscribe every handler's topic and pump messages until the streams
    /// end or `ctx` is cancelled. After the wrapped handler returns, the
    /// message is ack'ed on `Ok` and nack'ed on `Err` — a no-op when the
    /// handler already settled it.
    pub async fn run(
        self,
        subscriber: Arc<dyn Subscribe>,
        ctx: MessageContext,
    ) -> Result<(), RouterError> {
        let mut pumps = JoinSet::new();

        for entry in self.handlers.iter() {
            let mut stream = subscriber.subscribe(ctx.clone(), &entry.topic).await?;
            let handler = self.wrapped(Arc::clone(&entry.handler));
            let name = entry.name.clone();
            let topic = entry.topic.clone();
            let cancelled = ctx.cancellation().clone();

            pumps.spawn(async move {
                tracing::debug!(handler = %name, topic = %topic, "delivery pump started");
                loop {
                    let msg = tokio::select! {
                        msg = stream.recv() => match msg {
                            Some(msg) => msg,
                            None => break,
                        },
                        _ = cancelled.cancelled() => break,
                    };

                    match handler(Arc::clone(&msg)).await {
                        Ok(()) => {
                            msg.ack();
                        }
                        Err(err) => {
                            tracing::warn!(
                                handler = %name,
                                uuid = %msg.uuid(),
                                error = %err,
                                "handler failed, requesting redelivery"
                            );
                            msg.nack();
                        }
                    }
                }
                tracing::debug!(handler = %name, topic = %topic, "delivery pump stopped");
            });
        }

        let cancelled = ctx.cancellation().clone();
        loop {
            tokio::select! {
                joined = pumps.join_next() => match joined {
                    Some(_) => {}
                    None => return Ok(()),
                },
                _ = cancelled.cancelled() => break,
            }
        }

        // Cancelled: the pumps stop on their own; give in-flight messages
        // the close timeout to finish.
        tokio::time::timeout(self.config.close_timeout, async {
            while pumps.join_next().await.is_some() {}
        })
        .await
        .map_err(|_| RouterError::CloseTimeout)
    }
}

/// Build a router with the tracing middlewares installed in their mandatory
/// order: remote-parent extraction strictly before span start, so each
/// processing span is parented to the producer's propagated trace context.
pub fn init_traced_router() -> Result<Router, RouterError> {
    let mut router = Router::new(RouterConfig::default())?;
    router.add_middleware(ExtractRemoteParentContext::new());
    router.add_middleware(Trace::new());
    Ok(router)
}
