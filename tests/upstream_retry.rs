//! Upstream failure handling: retry with backoff, then 502.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;

use common::*;

#[tokio::test]
async fn test_dropped_connection_is_retried_once() {
    let (upstream, connections) = start_flaky_backend(1).await;
    let gateway = spawn_gateway(
        gateway_config(provider_record(upstream)),
        FakeOAuth2::new(&[]),
    )
    .await;

    let response = client().get(gateway.url("/health")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.text().await.unwrap().starts_with("GET /health"));
    assert_eq!(hits(&connections), 2);
    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_persistent_failure_is_bad_gateway() {
    let (upstream, connections) = start_flaky_backend(usize::MAX).await;
    let gateway = spawn_gateway(
        gateway_config(provider_record(upstream)),
        FakeOAuth2::new(&[]),
    )
    .await;

    let response = client().get(gateway.url("/health")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text().await.unwrap(), "Bad Gateway");
    assert_eq!(hits(&connections), 2);
    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_upstream_fails_fast() {
    let upstream = unused_addr().await;
    let gateway = spawn_gateway(
        gateway_config(provider_record(upstream)),
        FakeOAuth2::new(&[]),
    )
    .await;

    let start = Instant::now();
    let response = client().post(gateway.url("/health")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    // One retry, backoff capped at 200ms.
    assert!(start.elapsed() < Duration::from_secs(1));
    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_retries_disabled() {
    let (upstream, connections) = start_flaky_backend(1).await;
    let mut config = gateway_config(provider_record(upstream));
    config.retries.enabled = false;
    let gateway = spawn_gateway(config, FakeOAuth2::new(&[])).await;

    let response = client().get(gateway.url("/health")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(hits(&connections), 1);
    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_redirects_from_upstream_are_relayed() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .await;
            let _ = socket.shutdown().await;
        }
    });
    let gateway = spawn_gateway(
        gateway_config(provider_record(upstream)),
        FakeOAuth2::new(&[]),
    )
    .await;

    let response = client().get(gateway.url("/health")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()["location"], "/elsewhere");
    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_client_disconnect_cancels_upstream_call() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));

    let (seen, gone) = (connections.clone(), closed.clone());
    tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        while let Ok((mut socket, _)) = listener.accept().await {
            seen.fetch_add(1, Ordering::SeqCst);
            let gone = gone.clone();
            tokio::spawn(async move {
                // Never answer; wait for the gateway to hang up.
                let mut buf = [0u8; 2048];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                gone.store(true, Ordering::SeqCst);
            });
        }
    });
    let gateway = spawn_gateway(
        gateway_config(provider_record(upstream)),
        FakeOAuth2::new(&[]),
    )
    .await;

    let impatient = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let result = impatient.get(gateway.url("/health")).send().await;
    assert!(result.unwrap_err().is_timeout());

    for _ in 0..100 {
        if closed.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(closed.load(Ordering::SeqCst), "upstream call was not cancelled");
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    gateway.shutdown.trigger();
}
