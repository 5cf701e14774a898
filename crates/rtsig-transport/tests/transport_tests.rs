//! WebSocket transport tests
//!
//! - Connection establishment and text round-trips
//! - Bounded close handshake (graceful and stalled peer)
//! - URL validation and unreachable hosts
//! - Concurrent dialing of URL candidates

#![cfg(feature = "websocket")]

use rtsig_transport::{
    CloseOutcome, Transport, TransportError, TransportEvent, TransportReceiver, TransportSender,
    TransportServer, WebSocketServer, WebSocketTransport,
};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Server that echoes every text message back until the client leaves
async fn start_echo_server() -> String {
    let mut server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((sender, mut receiver, _)) = server.accept().await {
            tokio::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    match event {
                        TransportEvent::Text(text) => {
                            let _ = sender.send(text).await;
                        }
                        TransportEvent::Disconnected { .. } => break,
                        _ => {}
                    }
                }
            });
        }
    });

    format!("ws://{}/signaling", addr)
}

/// Server that completes the handshake and then never reads again
async fn start_stalled_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                held.push(ws);
            }
        }
    });

    format!("ws://{}/signaling", addr)
}

async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/signaling", addr)
}

async fn next_text(receiver: &mut impl TransportReceiver) -> Option<String> {
    loop {
        match timeout(Duration::from_secs(5), receiver.recv()).await {
            Ok(Some(TransportEvent::Text(text))) => return Some(text),
            Ok(Some(TransportEvent::Connected)) => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn test_websocket_echo() {
    let url = start_echo_server().await;
    let transport = WebSocketTransport::new();

    let (sender, mut receiver) = transport.connect(&url).await.unwrap();
    assert!(sender.is_connected());

    sender.send(r#"{"type":"ping"}"#.to_string()).await.unwrap();
    assert_eq!(
        next_text(&mut receiver).await.as_deref(),
        Some(r#"{"type":"ping"}"#)
    );
}

#[tokio::test]
async fn test_messages_keep_order() {
    let url = start_echo_server().await;
    let transport = WebSocketTransport::new();
    let (sender, mut receiver) = transport.connect(&url).await.unwrap();

    for i in 0..50 {
        sender.send(format!("msg-{}", i)).await.unwrap();
    }
    for i in 0..50 {
        assert_eq!(next_text(&mut receiver).await, Some(format!("msg-{}", i)));
    }
}

#[tokio::test]
async fn test_graceful_close() {
    let url = start_echo_server().await;
    let transport = WebSocketTransport::new();
    let (sender, _receiver) = transport.connect(&url).await.unwrap();

    let outcome = sender.close(Duration::from_secs(2)).await.unwrap();
    assert_eq!(outcome, CloseOutcome::Graceful);
    assert!(!sender.is_connected());

    // Only the first call performs the handshake
    let again = sender.close(Duration::from_secs(2)).await.unwrap();
    assert_eq!(again, CloseOutcome::AlreadyClosed);

    assert!(matches!(
        sender.send("late".to_string()).await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn test_close_times_out_on_stalled_peer() {
    let url = start_stalled_server().await;
    let transport = WebSocketTransport::new();
    let (sender, _receiver) = transport.connect(&url).await.unwrap();

    let start = Instant::now();
    let outcome = sender.close(Duration::from_millis(300)).await.unwrap();
    assert_eq!(outcome, CloseOutcome::TimedOut);
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_remote_close_reports_disconnect() {
    let mut server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((sender, _receiver, _)) = server.accept().await {
            let _ = sender.close(Duration::from_secs(2)).await;
        }
    });

    let transport = WebSocketTransport::new();
    let (_sender, mut receiver) = transport
        .connect(&format!("ws://{}/", addr))
        .await
        .unwrap();

    let mut disconnected = false;
    while let Ok(Some(event)) = timeout(Duration::from_secs(5), receiver.recv()).await {
        if let TransportEvent::Disconnected { .. } = event {
            disconnected = true;
            break;
        }
    }
    assert!(disconnected);
}

#[tokio::test]
async fn test_invalid_url() {
    let transport = WebSocketTransport::new();

    let result = transport.connect("http://127.0.0.1:1/signaling").await;
    assert!(matches!(result, Err(TransportError::InvalidUrl(_))));

    let result = transport.connect("::not a url::").await;
    assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
}

#[tokio::test]
async fn test_unreachable_host() {
    let url = closed_port_url().await;
    let transport = WebSocketTransport::new();

    let result = transport.connect(&url).await;
    assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_connect_first_picks_reachable_candidate() {
    let good = start_echo_server().await;
    let bad = closed_port_url().await;
    let transport = WebSocketTransport::new();

    let (sender, mut receiver, url) = transport
        .connect_first(&[bad, good.clone()])
        .await
        .unwrap();
    assert_eq!(url, good);

    sender.send("hello".to_string()).await.unwrap();
    assert_eq!(next_text(&mut receiver).await.as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_connect_first_all_fail() {
    let transport = WebSocketTransport::new();
    let urls = vec![closed_port_url().await, closed_port_url().await];

    let result = transport.connect_first(&urls).await;
    assert!(result.is_err());
}
