//! Process signal delivery to a running runtime.

#![cfg(unix)]

mod common;

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use runhttp::config::{RuntimeConfig, SignalSpec};
use runhttp::lifecycle::{RuntimeBuilder, RuntimePhase};
use runhttp::net::Listener;
use runhttp::observability::{MemorySink, SharedSink};

use common::{test_config, wait_for_phase};

fn send_to_self(signal: &str) {
    let status = Command::new("kill")
        .args([signal, &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn interrupt_stops_runtime_with_default_signals() {
    let mut config = test_config();
    config.signals = RuntimeConfig::default().signals;

    let sink = Arc::new(MemorySink::new());
    let runtime = RuntimeBuilder::new(config, Router::new())
        .listener(Listener::bind("127.0.0.1:0", 16).await.unwrap())
        .stats(sink.clone() as SharedSink)
        .build()
        .unwrap();
    let mut phase = runtime.subscribe_phase();
    let run = tokio::spawn(runtime.run());
    wait_for_phase(&mut phase, RuntimePhase::Running).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    send_to_self("-INT");

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("runtime ignored the interrupt")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(*phase.borrow(), RuntimePhase::Stopped);
    assert!(!sink.is_empty());

    let after_return = sink.len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.len(), after_return);
}

#[tokio::test]
async fn configured_signal_stops_runtime() {
    let mut config = test_config();
    config.signals.installed = vec!["OS".into()];
    config.signals.os.signals = vec![SignalSpec::Name("SIGUSR2".into())];

    let runtime = RuntimeBuilder::new(config, Router::new())
        .listener(Listener::bind("127.0.0.1:0", 16).await.unwrap())
        .build()
        .unwrap();
    let mut phase = runtime.subscribe_phase();
    let run = tokio::spawn(runtime.run());
    wait_for_phase(&mut phase, RuntimePhase::Running).await;

    send_to_self("-USR2");

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("runtime ignored the signal")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(*phase.borrow(), RuntimePhase::Stopped);
}
