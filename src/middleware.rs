//! Tracing middlewares for the message router.
//!
//! [`ExtractRemoteParentContext`] pulls a remotely-propagated parent trace
//! context (`traceparent` / `tracestate`) out of message metadata using the
//! globally installed text-map propagator and stores it on the message.
//! [`Trace`] opens a consumer span for the message's processing, parented to
//! that context, and instruments the rest of the chain with it.
//!
//! The pair must be installed in that order — see
//! [`init_traced_router`](crate::init_traced_router).

use std::collections::HashMap;
use std::sync::Arc;

use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TraceContextExt;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::message::Message;
use crate::router::{HandlerFn, Middleware};

/// Text-map extractor over message metadata.
struct MetadataExtractor<'a>(&'a HashMap<String, String>);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// Middleware that extracts a propagated parent trace context from message
/// metadata, if present, and stores it on the message.
#[derive(Default)]
pub struct ExtractRemoteParentContext;

impl ExtractRemoteParentContext {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for ExtractRemoteParentContext {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        Arc::new(move |msg: Arc<Message>| {
            let extracted = global::get_text_map_propagator(|propagator| {
                propagator.extract(&MetadataExtractor(msg.metadata()))
            });
            // Only replace the context when the metadata actually carried a
            // usable parent.
            if extracted.span().span_context().is_valid() {
                msg.set_context(msg.context().with_trace(extracted));
            }
            next(msg)
        })
    }
}

/// Middleware that starts a span scoped to the message's processing,
/// parented to the trace context carried by the message.
#[derive(Default)]
pub struct Trace;

impl Trace {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for Trace {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        Arc::new(move |msg: Arc<Message>| {
            let span = tracing::info_span!(
                "pubsub.process",
                otel.kind = "consumer",
                message.uuid = %msg.uuid(),
            );
            let ctx = msg.context();
            span.set_parent(ctx.trace().clone());
            let fut: futures::future::BoxFuture<'static, _> =
                Box::pin(next(msg).instrument(span));
            fut
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_extractor_exposes_keys_and_values() {
        let mut metadata = HashMap::new();
        metadata.insert(
            "traceparent".to_string(),
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string(),
        );

        let extractor = MetadataExtractor(&metadata);
        assert_eq!(
            extractor.get("traceparent"),
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
        );
        assert_eq!(extractor.keys(), vec!["traceparent"]);
    }
}
