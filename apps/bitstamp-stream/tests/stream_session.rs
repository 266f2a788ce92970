//! Stream Session Integration Tests
//!
//! Runs the client and supervisor against a local WebSocket server that
//! speaks the Bitstamp envelope protocol.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use bitstamp_stream::{
    FeedError, SessionEvent, StreamClient, StreamClientConfig, StreamClientError, Supervisor,
    SupervisorConfig, WsConnector,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Local Feed Server
// =============================================================================

/// One accepted WebSocket connection, seen from the server side.
struct ServerConn {
    /// Text frames sent by the client. Ends when the client disconnects.
    inbound: mpsc::UnboundedReceiver<String>,
    /// Messages to push to the client.
    outbound: mpsc::UnboundedSender<Message>,
}

impl ServerConn {
    fn push(&self, text: &str) {
        self.outbound.send(Message::text(text.to_owned())).unwrap();
    }

    async fn next_frame(&mut self) -> serde_json::Value {
        let text = timeout(WAIT, self.inbound.recv()).await.unwrap().unwrap();
        serde_json::from_str(&text).unwrap()
    }
}

struct FeedServer {
    url: String,
    connections: mpsc::UnboundedReceiver<ServerConn>,
    handle: tokio::task::JoinHandle<()>,
}

impl FeedServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, connections) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (in_tx, inbound) = mpsc::unbounded_channel();
                let (outbound, mut out_rx) = mpsc::unbounded_channel::<Message>();
                if conn_tx.send(ServerConn { inbound, outbound }).is_err() {
                    return;
                }

                tokio::spawn(async move {
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = in_tx.send(text.as_str().to_owned());
                                }
                                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                            out = out_rx.recv() => match out {
                                Some(msg) => {
                                    if write.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            url: format!("ws://{addr}"),
            connections,
            handle,
        }
    }

    async fn accept(&mut self) -> ServerConn {
        timeout(WAIT, self.connections.recv()).await.unwrap().unwrap()
    }
}

impl Drop for FeedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn client_config(url: &str) -> StreamClientConfig {
    StreamClientConfig::new(url).with_read_timeout(Duration::from_secs(10))
}

// =============================================================================
// Client Tests
// =============================================================================

#[tokio::test]
async fn test_subscribe_frames_reach_server_in_order() {
    let mut server = FeedServer::start().await;
    let client = assert_ok!(StreamClient::connect(client_config(&server.url)).await);
    let mut conn = server.accept().await;

    assert_ok!(
        client
            .subscribe(["live_trades_btcusd", "order_book_ethusd"])
            .await
    );

    let first = conn.next_frame().await;
    assert_eq!(
        first,
        serde_json::json!({"event": "bts:subscribe", "data": {"channel": "live_trades_btcusd"}})
    );
    let second = conn.next_frame().await;
    assert_eq!(second["data"]["channel"], "order_book_ethusd");

    assert_ok!(client.unsubscribe(["live_trades_btcusd"]).await);
    let third = conn.next_frame().await;
    assert_eq!(third["event"], "bts:unsubscribe");

    client.shutdown().await;
}

#[tokio::test]
async fn test_server_frames_become_events_and_errors() {
    let mut server = FeedServer::start().await;
    let mut client = assert_ok!(StreamClient::connect(client_config(&server.url)).await);
    let conn = server.accept().await;

    conn.push(r#"{"event":"bts:subscription_succeeded","channel":"live_trades_btcusd","data":{}}"#);
    conn.push("{not json");
    conn.push(r#"{"event":"trade","channel":"live_trades_btcusd","data":{"id":7,"amount":0.5}}"#);

    let ack = timeout(WAIT, client.recv_event()).await.unwrap().unwrap();
    assert_eq!(ack.event, "bts:subscription_succeeded");

    let trade = timeout(WAIT, client.recv_event()).await.unwrap().unwrap();
    assert_eq!(trade.event, "trade");
    assert_eq!(trade.data["id"], 7);

    let error = timeout(WAIT, client.recv_error()).await.unwrap().unwrap();
    assert!(matches!(error, FeedError::Decode(_)));

    client.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_request_is_delivered_as_event() {
    let mut server = FeedServer::start().await;
    let mut client = assert_ok!(StreamClient::connect(client_config(&server.url)).await);
    let conn = server.accept().await;

    conn.push(r#"{"event":"bts:request_reconnect","channel":"","data":""}"#);

    let envelope = timeout(WAIT, client.recv_event()).await.unwrap().unwrap();
    assert!(envelope.is_reconnect_request());
    assert!(bitstamp_stream::is_reconnect_request(&envelope));
    assert!(!client.is_closed());

    client.shutdown().await;
}

#[tokio::test]
async fn test_server_close_is_reported_as_closed_connection() {
    let mut server = FeedServer::start().await;
    let mut client = assert_ok!(StreamClient::connect(client_config(&server.url)).await);
    let conn = server.accept().await;

    conn.outbound.send(Message::Close(None)).unwrap();

    let error = timeout(WAIT, client.recv_error()).await.unwrap().unwrap();
    assert!(error.is_connection_closed(), "unexpected error: {error}");

    client.shutdown().await;
}

#[tokio::test]
async fn test_close_disconnects_from_server() {
    let mut server = FeedServer::start().await;
    let client = assert_ok!(StreamClient::connect(client_config(&server.url)).await);
    let handle = client.handle();
    let mut conn = server.accept().await;

    handle.close();
    handle.close();
    timeout(WAIT, handle.closed()).await.unwrap();

    assert!(timeout(WAIT, conn.inbound.recv()).await.unwrap().is_none());
    assert!(matches!(
        handle.subscribe(["live_trades_btcusd"]).await,
        Err(StreamClientError::Closed)
    ));
}

#[tokio::test]
async fn test_connect_to_unreachable_address_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = assert_err!(StreamClient::connect(client_config(&format!("ws://{addr}"))).await);
    assert!(matches!(err, StreamClientError::Connection { .. }));
}

// =============================================================================
// Supervisor Tests
// =============================================================================

#[tokio::test]
async fn test_supervisor_resubscribes_after_reconnect_request() {
    let mut server = FeedServer::start().await;
    let cancel = CancellationToken::new();
    let config = SupervisorConfig::new(
        client_config(&server.url),
        ["live_trades_btcusd", "diff_order_book_btcusd"]
            .into_iter()
            .collect(),
    );
    let (supervisor, mut events) =
        Supervisor::new(Arc::new(WsConnector::new()), config, 64, cancel.clone());
    let task = tokio::spawn(supervisor.run());

    let mut first = server.accept().await;
    assert_eq!(first.next_frame().await["data"]["channel"], "live_trades_btcusd");
    assert_eq!(first.next_frame().await["data"]["channel"], "diff_order_book_btcusd");

    let first_id = match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        SessionEvent::Connected { client_id } => client_id,
        other => panic!("expected Connected, got {other:?}"),
    };

    first.push(r#"{"event":"trade","channel":"live_trades_btcusd","data":{"id":1}}"#);
    first.push(r#"{"event":"bts:request_reconnect","channel":"","data":""}"#);

    let mut second = server.accept().await;
    assert_eq!(second.next_frame().await["data"]["channel"], "live_trades_btcusd");
    assert_eq!(second.next_frame().await["data"]["channel"], "diff_order_book_btcusd");

    let mut seen = Vec::new();
    let second_id = loop {
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            SessionEvent::Connected { client_id } => break client_id,
            event => seen.push(event),
        }
    };
    assert_ne!(first_id, second_id);
    assert!(matches!(&seen[0], SessionEvent::Envelope(env) if env.event == "trade"));
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::ReconnectRequested { client_id } if *client_id == first_id)));

    assert!(timeout(WAIT, first.inbound.recv()).await.unwrap().is_none());

    cancel.cancel();
    assert_ok!(timeout(WAIT, task).await.unwrap().unwrap());
}
