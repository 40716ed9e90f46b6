//! End-to-end trace propagation: a message carrying a `traceparent` must
//! produce a processing span parented to the remote producer's span, which
//! is only possible when the router extracts the parent before starting the
//! span.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use opentelemetry::trace::{SpanId, TraceId, TracerProvider as _};
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;

use pubsub_subscriber::{
    handle_message, init_traced_router, HandlerError, Message, MessageContext, MessageStream,
    Receipt, Subscribe, SubscribeError,
};

const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
const PARENT_SPAN_ID: &str = "b7ad6b7169203331";

#[derive(Serialize, Deserialize)]
struct AppointmentBooked {
    id: String,
}

/// Hands out a single pre-filled message stream.
struct StubSubscriber(Mutex<Option<MessageStream>>);

#[async_trait]
impl Subscribe for StubSubscriber {
    async fn subscribe(
        &self,
        _ctx: MessageContext,
        _topic: &str,
    ) -> Result<MessageStream, SubscribeError> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .take()
            .expect("stub supports one subscription"))
    }

    async fn close(&self) -> Result<(), SubscribeError> {
        Ok(())
    }
}

#[tokio::test]
async fn processing_span_is_parented_to_the_propagated_trace() {
    global::set_text_map_propagator(TraceContextPropagator::new());
    let exporter = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let tracer = provider.tracer("trace-propagation-test");
    let subscriber =
        tracing_subscriber::registry().with(tracing_opentelemetry::layer().with_tracer(tracer));
    let _guard = tracing::subscriber::set_default(subscriber);

    let payload = bitcode::serialize(&AppointmentBooked { id: "a-1".into() }).unwrap();
    let (msg, receipt) = Message::new("m-1", payload);
    let msg = msg.with_metadata("traceparent", TRACEPARENT);

    let (tx, rx) = mpsc::channel(1);
    tx.send(Arc::new(msg)).await.unwrap();
    drop(tx); // stream ends after the single message, so run() returns

    let mut router = init_traced_router().unwrap();
    router.add_handler("book-appointment", "appointments", |msg| async move {
        handle_message(&msg, |_ctx, booked: AppointmentBooked| async move {
            assert_eq!(booked.id, "a-1");
            Ok::<(), std::io::Error>(())
        })
        .await
        .map_err(|e| HandlerError::Other(Box::new(e)))
    });

    let stub = Arc::new(StubSubscriber(Mutex::new(Some(rx))));
    router.run(stub, MessageContext::new()).await.unwrap();

    assert_eq!(receipt.receipt().await, Some(Receipt::Ack));

    for result in provider.force_flush() {
        result.unwrap();
    }
    let spans = exporter.get_finished_spans().unwrap();
    let span = spans
        .iter()
        .find(|s| s.name == "pubsub.process")
        .expect("processing span was exported");

    assert_eq!(
        span.span_context.trace_id(),
        TraceId::from_hex(TRACE_ID).unwrap(),
        "span must continue the producer's trace"
    );
    assert_eq!(
        span.parent_span_id,
        SpanId::from_hex(PARENT_SPAN_ID).unwrap(),
        "span must be a child of the propagated parent"
    );
}

#[tokio::test]
async fn message_without_traceparent_starts_a_fresh_trace() {
    global::set_text_map_propagator(TraceContextPropagator::new());
    let exporter = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let tracer = provider.tracer("trace-propagation-test");
    let subscriber =
        tracing_subscriber::registry().with(tracing_opentelemetry::layer().with_tracer(tracer));
    let _guard = tracing::subscriber::set_default(subscriber);

    let payload = bitcode::serialize(&AppointmentBooked { id: "a-2".into() }).unwrap();
    let (msg, receipt) = Message::new("m-2", payload);

    let (tx, rx) = mpsc::channel(1);
    tx.send(Arc::new(msg)).await.unwrap();
    drop(tx);

    let mut router = init_traced_router().unwrap();
    router.add_handler("book-appointment", "appointments", |msg| async move {
        handle_message(&msg, |_ctx, _booked: AppointmentBooked| async move {
            Ok::<(), std::io::Error>(())
        })
        .await
        .map_err(|e| HandlerError::Other(Box::new(e)))
    });

    let stub = Arc::new(StubSubscriber(Mutex::new(Some(rx))));
    router.run(stub, MessageContext::new()).await.unwrap();
    assert_eq!(receipt.receipt().await, Some(Receipt::Ack));

    for result in provider.force_flush() {
        result.unwrap();
    }
    let spans = exporter.get_finished_spans().unwrap();
    let span = spans
        .iter()
        .find(|s| s.name == "pubsub.process")
        .expect("processing span was exported");

    assert_eq!(span.parent_span_id, SpanId::INVALID, "no remote parent");
    assert_ne!(span.span_context.trace_id(), TraceId::INVALID);
}
