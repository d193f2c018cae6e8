//! # Dispatch Integration Tests
//!
//! Drives a running engine through `on_message` the way a transport reader
//! would, and checks what the registered listeners observe.

use std::sync::Arc;
use std::time::Duration;

use rpc_correlation::{
    CorrelationEngine, DialEvent, DialParams, EngineConfig, Metrics, Outcome, Routed,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Dial(DialEvent, DialParams),
    Lifecycle(String, String),
    StateChange(String, String),
}

fn started_engine(metrics: Arc<Metrics>) -> (CorrelationEngine, mpsc::UnboundedReceiver<Seen>) {
    let engine = CorrelationEngine::with_metrics(EngineConfig::default(), metrics).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    let dial_tx = tx.clone();
    engine.set_dial_listener(move |event, params| {
        let _ = dial_tx.send(Seen::Dial(event, params.clone()));
    });
    let lifecycle_tx = tx.clone();
    engine.set_lifecycle_listener(move |event, params| {
        let _ = lifecycle_tx.send(Seen::Lifecycle(event.to_string(), params.to_string()));
    });
    engine.set_state_change_listener(move |event, params| {
        let _ = tx.send(Seen::StateChange(event.to_string(), params.to_string()));
    });

    engine.start().unwrap();
    (engine, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("listener invoked in time")
        .expect("channel open")
}

fn notification(method: &str, params: &str) -> String {
    format!(r#"{{"jsonrpc":"2.0","method":"{method}","params":{params}}}"#)
}

#[tokio::test]
async fn test_notifications_delivered_in_order() {
    let (engine, mut rx) = started_engine(Arc::new(Metrics::new()));

    for name in ["A.statechange", "B.statechange", "C.statechange"] {
        assert_eq!(
            engine.on_message(&notification(name, "{}")),
            Routed::Notification
        );
    }

    let mut order = Vec::new();
    for _ in 0..3 {
        match next(&mut rx).await {
            Seen::StateChange(event, _) => order.push(event),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }
    assert_eq!(order, vec!["A.statechange", "B.statechange", "C.statechange"]);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_classification_routes_to_listeners() {
    let metrics = Arc::new(Metrics::new());
    let (engine, mut rx) = started_engine(metrics.clone());

    engine.on_message(&notification(
        "org.rdk.Xcast.1.onApplicationLaunchRequest",
        r#"{"applicationName":"YouTube","applicationId":"1","strPayLoad":"v=x"}"#,
    ));
    engine.on_message(&notification("foo.bar", "{}"));
    engine.on_message(&notification(
        "org.rdk.RDKShell.1.onApplicationSuspended",
        r#"{"client":"netflix"}"#,
    ));
    engine.on_message(&notification("Controller.1.statechange", r#"{"state":"Activated"}"#));

    let expected_dial = DialParams {
        app_name: "YouTube".to_string(),
        app_id: "1".to_string(),
        payload: Some("v=x".to_string()),
        query: None,
        add_data_url: None,
    };
    assert_eq!(next(&mut rx).await, Seen::Dial(DialEvent::Launch, expected_dial));
    assert_eq!(
        next(&mut rx).await,
        Seen::Lifecycle(
            "org.rdk.RDKShell.1.onApplicationSuspended".to_string(),
            r#"{"client":"netflix"}"#.to_string()
        )
    );
    assert_eq!(
        next(&mut rx).await,
        Seen::StateChange(
            "Controller.1.statechange".to_string(),
            r#"{"state":"Activated"}"#.to_string()
        )
    );

    engine.shutdown().await;
    assert!(rx.try_recv().is_err());
    let snap = metrics.snapshot();
    assert_eq!(snap.notifications_unrecognised, 1);
    assert_eq!(snap.notifications_dispatched, 3);
}

#[tokio::test]
async fn test_panicking_listener_does_not_stop_drain() {
    let metrics = Arc::new(Metrics::new());
    let engine = CorrelationEngine::with_metrics(EngineConfig::default(), metrics.clone()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.set_lifecycle_listener(move |event, _| {
        if event == "onDestroyed" {
            panic!("listener failure");
        }
        let _ = tx.send(event.to_string());
    });
    engine.start().unwrap();

    engine.on_message(&notification("onDestroyed", "{}"));
    engine.on_message(&notification("onLaunched", "{}"));

    let delivered = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(delivered.as_deref(), Some("onLaunched"));
    assert_eq!(metrics.snapshot().listener_panics, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_replies_and_notifications_share_one_inbound_path() {
    let (engine, mut rx) = started_engine(Arc::new(Metrics::new()));

    let reply = engine.complete_async(1001);
    let frame = r#"{"jsonrpc":"2.0","id":1001,"result":0}"#;
    assert_eq!(engine.on_message(frame), Routed::Reply);
    assert_eq!(engine.on_message(frame), Routed::LateReply);
    assert_eq!(
        engine.on_message(&notification("onLaunched", r#"{"client":"x"}"#)),
        Routed::Notification
    );
    assert_eq!(engine.on_message("{oops"), Routed::Dropped);

    assert_eq!(reply.await, Outcome::Completed(frame.to_string()));
    assert_eq!(
        next(&mut rx).await,
        Seen::Lifecycle("onLaunched".to_string(), r#"{"client":"x"}"#.to_string())
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_no_listener_registered() {
    let engine = CorrelationEngine::new(EngineConfig::default()).unwrap();
    engine.start().unwrap();

    assert_eq!(
        engine.on_message(&notification("onLaunched", "{}")),
        Routed::Notification
    );
    engine.on_connection(true);

    engine.shutdown().await;
    assert_eq!(engine.dispatcher().queued(), 0);
}
