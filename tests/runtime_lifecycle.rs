//! End-to-end runtime lifecycle tests over real sockets.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use runhttp::http::{default_router, RouterConfig};
use runhttp::lifecycle::{manual_signal, RuntimeBuilder, RuntimeError, RuntimePhase};
use runhttp::net::{Listener, ListenerError};
use runhttp::observability::{MemorySink, SharedSink};

use common::{test_config, wait_for_phase};

async fn bound_listener() -> Listener {
    Listener::bind("127.0.0.1:0", 100).await.unwrap()
}

#[tokio::test]
async fn manual_stop_serves_then_exits_cleanly() {
    let (trigger, source) = manual_signal();
    let runtime = RuntimeBuilder::new(test_config(), default_router(&RouterConfig::default()))
        .listener(bound_listener().await)
        .signal(source)
        .build()
        .unwrap();
    let addr = runtime.local_addr().unwrap();
    let mut phase = runtime.subscribe_phase();
    assert_eq!(runtime.phase(), RuntimePhase::Idle);

    let run = tokio::spawn(runtime.run());
    wait_for_phase(&mut phase, RuntimePhase::Running).await;

    let response = reqwest::get(format!("http://{addr}/healthcheck")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "Success");

    assert!(trigger.stop());
    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("runtime did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(*phase.borrow(), RuntimePhase::Stopped);
}

#[tokio::test]
async fn occupied_port_exits_with_listener_error() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config();
    config.httpserver.address = occupied.local_addr().unwrap().to_string();

    let runtime = RuntimeBuilder::new(config, Router::new()).build().unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), runtime.run())
        .await
        .expect("runtime did not exit on bind failure");

    assert!(matches!(
        result,
        Err(RuntimeError::Listener(ListenerError::Bind { .. }))
    ));
}

#[tokio::test]
async fn custom_source_fault_is_returned() {
    let (trigger, source) = manual_signal();
    let runtime = RuntimeBuilder::new(test_config(), Router::new())
        .listener(bound_listener().await)
        .signal(source)
        .build()
        .unwrap();
    let mut phase = runtime.subscribe_phase();
    let run = tokio::spawn(runtime.run());
    wait_for_phase(&mut phase, RuntimePhase::Running).await;

    trigger.fail(RuntimeError::Fault("backend lost".into()));
    let result = run.await.unwrap();
    assert!(matches!(result, Err(RuntimeError::Fault(ref msg)) if msg == "backend lost"));
}

#[tokio::test]
async fn reporters_tick_while_running_and_never_after() {
    let sink = Arc::new(MemorySink::new());
    let (trigger, source) = manual_signal();
    let runtime = RuntimeBuilder::new(test_config(), Router::new())
        .listener(bound_listener().await)
        .stats(sink.clone() as SharedSink)
        .signal(source)
        .build()
        .unwrap();
    let mut phase = runtime.subscribe_phase();
    let run = tokio::spawn(runtime.run());
    wait_for_phase(&mut phase, RuntimePhase::Running).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!sink.gauges("http.server.connstate.new.gauge").is_empty());
    assert!(!sink.gauges("runtime.memstats.alloc").is_empty());
    assert!(!sink.gauges("runtime.tasks.alive").is_empty());

    trigger.stop();
    run.await.unwrap().unwrap();

    let after_return = sink.len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.len(), after_return);
}

#[tokio::test]
async fn in_flight_request_completes_during_drain() {
    let app = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            "done"
        }),
    );
    let (trigger, source) = manual_signal();
    let runtime = RuntimeBuilder::new(test_config(), app)
        .listener(bound_listener().await)
        .signal(source)
        .build()
        .unwrap();
    let addr = runtime.local_addr().unwrap();
    let tracker = runtime.conn_state();
    let mut phase = runtime.subscribe_phase();
    let run = tokio::spawn(runtime.run());
    wait_for_phase(&mut phase, RuntimePhase::Running).await;

    let request = tokio::spawn(async move {
        let response = reqwest::get(format!("http://{addr}/slow")).await?;
        response.text().await
    });

    tokio::time::timeout(Duration::from_secs(2), async {
        while tracker.counts().active == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("request never became active");

    trigger.stop();
    wait_for_phase(&mut phase, RuntimePhase::Draining).await;

    assert_eq!(request.await.unwrap().unwrap(), "done");
    run.await.unwrap().unwrap();
    assert_eq!(tracker.tracked(), 0);
}

#[tokio::test]
async fn connection_states_are_counted() {
    let sink = Arc::new(MemorySink::new());
    let (trigger, source) = manual_signal();
    let runtime = RuntimeBuilder::new(test_config(), default_router(&RouterConfig::default()))
        .listener(bound_listener().await)
        .stats(sink.clone() as SharedSink)
        .signal(source)
        .build()
        .unwrap();
    let addr = runtime.local_addr().unwrap();
    let mut phase = runtime.subscribe_phase();
    let run = tokio::spawn(runtime.run());
    wait_for_phase(&mut phase, RuntimePhase::Running).await;

    let client = reqwest::Client::new();
    for _ in 0..3 {
        let response = client
            .get(format!("http://{addr}/healthcheck"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
    drop(client);

    trigger.stop();
    run.await.unwrap().unwrap();

    assert!(sink.total_count("http.server.connstate.new") >= 1);
    assert_eq!(sink.total_count("http.server.connstate.active"), 3);
    assert_eq!(sink.total_count("http.server.connstate.idle"), 3);
    assert_eq!(
        sink.total_count("http.server.connstate.closed"),
        sink.total_count("http.server.connstate.new")
    );
    assert_eq!(sink.total_count("http.server.request"), 3);
}
