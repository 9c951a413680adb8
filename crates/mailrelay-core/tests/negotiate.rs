//! Negotiation against loopback SMTP servers.
//!
//! Each server plays a short script: a greeting, then one reply per line
//! read from the client, then it hangs up.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use mailrelay_core::{
    ConnectionError, DispatchError, Dispatcher, FallbackPolicy, RelayConfig, SecurityMode,
    SendRequest, SmtpConnector, TransportStrategy,
};

/// Starts a one-connection server and returns its port.
async fn scripted_server(greeting: &'static str, replies: &'static [&'static str]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();

        write.write_all(greeting.as_bytes()).await.unwrap();
        for reply in replies {
            if lines.next_line().await.unwrap().is_none() {
                return;
            }
            write.write_all(reply.as_bytes()).await.unwrap();
        }
        while let Ok(Some(_)) = lines.next_line().await {}
    });

    port
}

/// Returns a loopback port with nothing listening on it.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn dispatcher(policy: FallbackPolicy, strategies: Vec<TransportStrategy>) -> Dispatcher {
    let mut config = RelayConfig::new("127.0.0.1", "relay@example.com", "pw");
    config.fallback = policy;
    let connector = Arc::new(SmtpConnector::new("relay.test"));
    Dispatcher::with_strategies(Arc::new(config), connector, strategies)
}

fn request() -> SendRequest {
    SendRequest::new("sender@example.com", "rcpt@example.org", "Hi", "<p>Hello</p>")
}

#[tokio::test]
async fn refusing_greeting_then_closed_port_is_fatal_by_default() {
    let refusing = scripted_server("554 no service here\r\n", &[]).await;
    let closed = closed_port().await;

    let err = dispatcher(
        FallbackPolicy::ProtocolRefusal,
        vec![
            TransportStrategy::new(refusing, SecurityMode::StartTls),
            TransportStrategy::new(closed, SecurityMode::StartTls),
        ],
    )
    .dispatch(&request())
    .await
    .unwrap_err();

    match err {
        DispatchError::Unexpected(ConnectionError::Fatal { strategy, .. }) => {
            assert_eq!(strategy.port, closed);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_host_is_unavailable_with_broad_policy() {
    let refusing = scripted_server("554 no service here\r\n", &[]).await;
    let closed = closed_port().await;

    let err = dispatcher(
        FallbackPolicy::AnyFailure,
        vec![
            TransportStrategy::new(refusing, SecurityMode::StartTls),
            TransportStrategy::new(closed, SecurityMode::StartTls),
        ],
    )
    .dispatch(&request())
    .await
    .unwrap_err();

    match err {
        DispatchError::TransportUnavailable(ConnectionError::Exhausted { attempted, source, .. }) => {
            assert_eq!(attempted.len(), 2);
            assert!(matches!(source, mailrelay_smtp::Error::Io(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn starttls_refusal_falls_back() {
    let no_tls = scripted_server(
        "220 mx.test ESMTP\r\n",
        &["250-mx.test\r\n250 STARTTLS\r\n", "454 4.7.0 TLS not available\r\n"],
    )
    .await;
    let busy = scripted_server("421 mx.test busy\r\n", &[]).await;

    let err = dispatcher(
        FallbackPolicy::ProtocolRefusal,
        vec![
            TransportStrategy::new(no_tls, SecurityMode::StartTls),
            TransportStrategy::new(busy, SecurityMode::StartTls),
        ],
    )
    .dispatch(&request())
    .await
    .unwrap_err();

    match err {
        DispatchError::TransportUnavailable(ConnectionError::Exhausted { source, .. }) => {
            assert_eq!(source.reply_code(), Some(421));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_starttls_is_not_a_refusal() {
    let plain_only = scripted_server("220 mx.test ESMTP\r\n", &["250 mx.test\r\n"]).await;
    let busy = scripted_server("421 mx.test busy\r\n", &[]).await;

    let err = dispatcher(
        FallbackPolicy::ProtocolRefusal,
        vec![
            TransportStrategy::new(plain_only, SecurityMode::StartTls),
            TransportStrategy::new(busy, SecurityMode::StartTls),
        ],
    )
    .dispatch(&request())
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Unexpected(ConnectionError::Fatal {
            source: mailrelay_smtp::Error::NotSupported(_),
            ..
        })
    ));
}
