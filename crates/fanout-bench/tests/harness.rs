//! Harness runs against a live fanout server with an echoing peer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use fanout_bench::{BenchConfig, BenchError, run};
use fanout_core::{Envelope, EnvelopeKind};
use fanout_server::config::ServerConfig;
use fanout_server::server::FanoutServer;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn boot_server() -> (SocketAddr, Arc<FanoutServer>, JoinHandle<()>) {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        shutdown_timeout_secs: 2,
        ..ServerConfig::default()
    };
    let server = Arc::new(FanoutServer::new(config, None).unwrap());
    let (addr, handle) = server.listen().await.unwrap();
    (addr, server, handle)
}

/// Connect a peer that sends every peer message straight back, and wait until
/// it is registered.
async fn spawn_echo_peer(addr: SocketAddr) -> JoinHandle<()> {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            let notice = Envelope::from_frame(&text).unwrap();
            assert_eq!(notice.kind(), EnvelopeKind::Join);
            break;
        }
    }

    tokio::spawn(async move {
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(envelope) = Envelope::from_frame(&text) else {
                continue;
            };
            if envelope.kind() == EnvelopeKind::Message
                && ws.send(Message::text(text.to_string())).await.is_err()
            {
                break;
            }
        }
    })
}

fn config(addr: SocketAddr, dir: &std::path::Path, clients: usize, messages: usize) -> BenchConfig {
    BenchConfig {
        clients,
        messages,
        host: addr.ip().to_string(),
        port: addr.port(),
        server: "test".into(),
        output_dir: dir.to_path_buf(),
        read_timeout: Duration::from_secs(2),
        retry_backoff: Duration::from_millis(50),
        ..BenchConfig::default()
    }
}

#[tokio::test]
async fn one_client_five_messages_records_five_timings() {
    let (addr, server, handle) = boot_server().await;
    let echo = spawn_echo_peer(addr).await;
    let tmp = tempfile::tempdir().unwrap();

    let (path, results) = tokio::time::timeout(TIMEOUT, run(config(addr, tmp.path(), 1, 5)))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(path, tmp.path().join("results-client-test-1-messages-5.json"));
    assert!(path.exists());

    let client = &results["Client_1"];
    assert_eq!(client.messages_timings.len(), 5);
    assert!(client.min <= client.avg);
    assert!(client.avg <= client.max);
    assert!(client.messages_timings.iter().all(|t| t.client_id == "Client_1"));

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let entry = &raw["Client_1"];
    for field in ["avg", "min", "max"] {
        assert!(entry[field].is_number(), "{field} missing");
    }
    assert_eq!(entry["messages_timings"].as_array().unwrap().len(), 5);

    echo.abort();
    let _ = server.stop(handle).await;
}

#[tokio::test]
async fn concurrent_clients_each_get_an_entry() {
    let (addr, server, handle) = boot_server().await;
    let echo = spawn_echo_peer(addr).await;
    let tmp = tempfile::tempdir().unwrap();

    let (_, results) = tokio::time::timeout(TIMEOUT, run(config(addr, tmp.path(), 3, 4)))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(results.len(), 3);
    for id in ["Client_1", "Client_2", "Client_3"] {
        let client = &results[id];
        assert_eq!(client.messages_timings.len(), 4);
        assert!(client.min <= client.avg && client.avg <= client.max);
    }

    echo.abort();
    let _ = server.stop(handle).await;
}

#[tokio::test]
async fn unreachable_server_writes_empty_report() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let tmp = tempfile::tempdir().unwrap();

    let (path, results) = run(config(addr, tmp.path(), 2, 3)).await.unwrap();

    assert!(results.is_empty());
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(raw, serde_json::json!({}));
}

#[tokio::test]
async fn zero_retries_fails_before_dialing() {
    let tmp = tempfile::tempdir().unwrap();
    let config = BenchConfig {
        max_retries: 0,
        output_dir: tmp.path().join("metrics"),
        ..BenchConfig::default()
    };

    let result = run(config).await;

    assert!(matches!(result, Err(BenchError::InvalidConfig(_))));
    assert!(!tmp.path().join("metrics").exists());
}
