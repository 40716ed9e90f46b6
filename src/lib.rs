//! pubsub_subscriber — Pub/Sub subscription adapter with traced routing and
//! typed decode-and-dispatch handlers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Subscriber (per process)                   │
//! │  Environment::Production → PushSubscriber (HTTP push)        │
//! │  Environment::Local      → FakeSubscriber (never delivers)   │
//! └──────────────────────────────────────────────────────────────┘
//!                              │ subscribe(ctx, topic)
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Router (init_traced_router)              │
//! │  extract remote parent ──► start span ──► handler            │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │   handle_message::<T>(msg, handler)                          │
//! │   decode fails → ack + error   handler fails → nack          │
//! │   handler ok   → ack                                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Acknowledgement policy
//!
//! A message is ack'ed whenever another delivery attempt cannot help: the
//! payload is undecodable, or the handler already processed it. It is
//! nack'ed only on handler failure, which is presumed transient, so the
//! broker redelivers.

mod fake;
mod handle;
mod message;
mod middleware;
mod push;
mod router;
mod subscriber;

pub use fake::FakeSubscriber;
pub use handle::{decode_payload, handle_message, HandleError};
pub use message::{Message, MessageContext, Receipt, ReceiptReceiver};
pub use middleware::{ExtractRemoteParentContext, Trace};
pub use push::{PushSubscriber, RegisterHttpHandler};
pub use router::{
    init_traced_router, HandlerError, HandlerFn, Middleware, Router, RouterConfig, RouterError,
};
pub use subscriber::{
    Environment, MessageStream, Subscribe, SubscribeError, Subscriber, SubscriberConfig,
    DEFAULT_CHANNEL_CAPACITY,
};
