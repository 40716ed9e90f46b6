use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pubsub_subscriber::{
    Environment, MessageContext, Subscribe, Subscriber, SubscriberConfig,
};

#[tokio::test]
async fn local_environment_wires_up_without_a_transport() {
    let registered = Arc::new(AtomicBool::new(false));
    let register = {
        let registered = Arc::clone(&registered);
        Box::new(move |_path: &str, _route: axum::routing::MethodRouter| {
            registered.store(true, Ordering::SeqCst);
        })
    };

    let subscriber = Subscriber::new(SubscriberConfig::new(Environment::Local), register)
        .expect("fake construction never fails");

    let mut stream = subscriber
        .subscribe(MessageContext::new(), "appointments")
        .await
        .expect("fake subscribe never fails");

    // No delivery endpoint is mounted and no message ever arrives.
    assert!(!registered.load(Ordering::SeqCst));
    let waited = tokio::time::timeout(Duration::from_millis(100), stream.recv()).await;
    assert!(waited.is_err(), "fake subscription must never yield");

    assert!(subscriber.close().await.is_ok());
    assert!(stream.recv().await.is_none(), "close ends the stream");
}

#[tokio::test]
async fn any_topic_is_accepted() {
    let subscriber = Subscriber::new(
        SubscriberConfig::new(Environment::Local),
        Box::new(|_path, _route| {}),
    )
    .unwrap();

    for topic in ["appointments", "orders", ""] {
        assert!(subscriber
            .subscribe(MessageContext::new(), topic)
            .await
            .is_ok());
    }
    assert!(subscriber.close().await.is_ok());
}
