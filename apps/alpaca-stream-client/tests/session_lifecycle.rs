//! Session Lifecycle Integration Tests
//!
//! Drives a session against a local WebSocket server that scripts the
//! stream's handshake, data batches, and closure replies.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use alpaca_stream_client::infrastructure::alpaca::{AUTHENTICATED_ACK, CONNECTED_ACK};
use alpaca_stream_client::{
    ClientError, Credentials, DisconnectSettings, EventRouter, EventSink, Record, RouterExit,
    Session, SessionConfig, SessionControl, SessionOutputs, SessionState, SinkError,
    TransportFault,
};

type ServerSocket = WebSocketStream<TcpStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept one WebSocket connection and hand it to `script`.
async fn serve<F, Fut>(script: F) -> String
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(ws).await;
    });

    format!("ws://{addr}")
}

/// Send the connected and authenticated acknowledgments.
async fn handshake(ws: &mut ServerSocket) -> String {
    ws.send(Message::text(CONNECTED_ACK)).await.unwrap();
    let auth = next_text(ws).await;
    ws.send(Message::text(AUTHENTICATED_ACK)).await.unwrap();
    auth
}

async fn next_text(ws: &mut ServerSocket) -> String {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
            Some(Ok(_)) => {}
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Keep reading until the client goes away; replies to a close frame.
async fn drain(mut ws: ServerSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

async fn wait_for_state(session: &Session, expected: SessionState) {
    timeout(RECV_TIMEOUT, async {
        while session.state() != expected {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

fn credentials() -> Credentials {
    Credentials::new("test-key", "test-secret").unwrap()
}

fn quick_disconnect() -> DisconnectSettings {
    DisconnectSettings {
        close_attempts: 2,
        close_retry_delay: Duration::from_millis(10),
        close_ack_timeout: Duration::from_millis(200),
    }
}

fn trade_json(id: usize) -> String {
    format!(
        r#"{{"T":"t","i":{id},"S":"AAPL","x":"D","p":126.55,"s":1,"t":"2021-02-22T15:51:44.208Z","c":["@"],"z":"C"}}"#
    )
}

fn trade_batch(ids: std::ops::Range<usize>) -> String {
    let records: Vec<String> = ids.map(trade_json).collect();
    format!("[{}]", records.join(","))
}

/// Counts every record it is handed.
#[derive(Default)]
struct CountingSink {
    seen: AtomicUsize,
}

#[async_trait]
impl EventSink for CountingSink {
    async fn handle(&self, _record: &Record) -> Result<(), SinkError> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn authenticated_session(url: String) -> (Arc<Session>, SessionOutputs) {
    authenticated_session_with(SessionConfig::new(url)).await
}

async fn authenticated_session_with(config: SessionConfig) -> (Arc<Session>, SessionOutputs) {
    let (session, outputs) = Session::new(config);
    session.connect().await.unwrap();
    session.authenticate(&credentials()).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
    (session, outputs)
}

// =============================================================================
// Connect
// =============================================================================

#[tokio::test]
async fn connect_accepts_exact_acknowledgment() {
    let url = serve(|mut ws| async move {
        ws.send(Message::text(CONNECTED_ACK)).await.unwrap();
        drain(ws).await;
    })
    .await;

    let (session, _outputs) = Session::new(SessionConfig::new(url));
    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);

    let err = session.connect().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::InvalidState {
            operation: "connect",
            state: SessionState::Connected
        }
    ));
}

#[tokio::test]
async fn connect_rejects_unexpected_first_frame() {
    let url = serve(|mut ws| async move {
        ws.send(Message::text(r#"[{"T":"success","msg":"hello"}]"#))
            .await
            .unwrap();
        drain(ws).await;
    })
    .await;

    let (session, _outputs) = Session::new(SessionConfig::new(url));
    let err = session.connect().await.unwrap_err();

    match err {
        ClientError::Handshake { payload } => assert!(payload.contains("hello")),
        other => panic!("expected handshake error, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn connect_fails_when_unreachable() {
    let (session, _outputs) = Session::new(SessionConfig::new("ws://127.0.0.1:1"));
    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Connect(_)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn disconnect_during_connect_stays_closed() {
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let url = serve(|mut ws| async move {
        let _ = release_rx.await;
        let _ = ws.send(Message::text(CONNECTED_ACK)).await;
        drain(ws).await;
    })
    .await;

    let mut config = SessionConfig::new(url);
    config.disconnect = quick_disconnect();
    let (session, _outputs) = Session::new(config);

    let connecting = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.connect().await }
    });
    wait_for_state(&session, SessionState::Connecting).await;

    timeout(RECV_TIMEOUT, session.disconnect()).await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    release_tx.send(()).unwrap();
    let err = timeout(RECV_TIMEOUT, connecting)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::InvalidState {
            operation: "connect",
            state: SessionState::Closed
        }
    ));
    assert_eq!(session.state(), SessionState::Closed);
}

// =============================================================================
// Authenticate
// =============================================================================

#[tokio::test]
async fn authenticate_sends_credentials() {
    let (tx, rx) = oneshot::channel();
    let url = serve(|mut ws| async move {
        let auth = handshake(&mut ws).await;
        let _ = tx.send(auth);
        drain(ws).await;
    })
    .await;

    let (_session, _outputs) = authenticated_session(url).await;

    let auth: serde_json::Value = serde_json::from_str(&rx.await.unwrap()).unwrap();
    assert_eq!(auth["action"], "auth");
    assert_eq!(auth["key"], "test-key");
    assert_eq!(auth["secret"], "test-secret");
}

#[tokio::test]
async fn authenticate_reports_server_rejection() {
    let url = serve(|mut ws| async move {
        ws.send(Message::text(CONNECTED_ACK)).await.unwrap();
        let _auth = next_text(&mut ws).await;
        ws.send(Message::text(r#"[{"T":"error","code":402,"msg":"auth failed"}]"#))
            .await
            .unwrap();
        drain(ws).await;
    })
    .await;

    let (session, _outputs) = Session::new(SessionConfig::new(url));
    session.connect().await.unwrap();
    let err = session.authenticate(&credentials()).await.unwrap_err();

    assert!(err.is_bad_credentials());
    match err {
        ClientError::AuthRejected { code, reason } => {
            assert_eq!(code, Some(402));
            assert_eq!(reason, "auth failed");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn authenticate_reports_transport_failure() {
    let url = serve(|mut ws| async move {
        ws.send(Message::text(CONNECTED_ACK)).await.unwrap();
        let _auth = next_text(&mut ws).await;
        ws.close(None).await.unwrap();
        drain(ws).await;
    })
    .await;

    let (session, _outputs) = Session::new(SessionConfig::new(url));
    session.connect().await.unwrap();
    let err = session.authenticate(&credentials()).await.unwrap_err();

    assert!(matches!(err, ClientError::AuthTransport(_)));
    assert!(!err.is_bad_credentials());
    assert_eq!(session.state(), SessionState::Connected);
}

// =============================================================================
// Subscription Commands
// =============================================================================

#[tokio::test]
async fn subscribe_sends_every_list() {
    let (tx, rx) = oneshot::channel();
    let url = serve(|mut ws| async move {
        handshake(&mut ws).await;
        let command = next_text(&mut ws).await;
        let _ = tx.send(command);
        drain(ws).await;
    })
    .await;

    let (session, _outputs) = authenticated_session(url).await;
    session.subscribe(&[], &["AAPL".to_string()]).await;

    let command: serde_json::Value = serde_json::from_str(&rx.await.unwrap()).unwrap();
    assert_eq!(
        command,
        serde_json::json!({
            "action": "subscribe",
            "trades": [],
            "quotes": ["AAPL"],
            "bars": []
        })
    );
}

#[tokio::test]
async fn unsubscribe_sends_action() {
    let (tx, rx) = oneshot::channel();
    let url = serve(|mut ws| async move {
        handshake(&mut ws).await;
        let command = next_text(&mut ws).await;
        let _ = tx.send(command);
        drain(ws).await;
    })
    .await;

    let (session, _outputs) = authenticated_session(url).await;
    session
        .unsubscribe(&["MSFT".to_string()], &["MSFT".to_string()])
        .await;

    let command: serde_json::Value = serde_json::from_str(&rx.await.unwrap()).unwrap();
    assert_eq!(command["action"], "unsubscribe");
    assert_eq!(command["trades"], serde_json::json!(["MSFT"]));
}

// =============================================================================
// Receive Loop
// =============================================================================

#[tokio::test]
async fn listen_routes_records_and_reports_closure() {
    let url = serve(|mut ws| async move {
        handshake(&mut ws).await;
        let batch = r#"[
            {"T":"subscription","trades":["AAPL"],"quotes":["AMD"],"bars":[]},
            {"T":"t","i":96921,"S":"AAPL","x":"D","p":126.55,"s":1,"t":"2021-02-22T15:51:44.208Z","c":["@","I"],"z":"C"},
            {"T":"q","S":"AMD","bx":"U","bp":87.66,"bs":1,"ax":"Q","ap":87.68,"as":4,"t":"2021-02-22T15:51:45.335689322Z","c":["R"],"z":"C"},
            {"T":"error","code":406,"msg":"connection limit exceeded"}
        ]"#;
        ws.send(Message::text(batch)).await.unwrap();
        ws.send(Message::text(r#"[{"T":"t","S":"AAPL"}]"#)).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "maintenance".into(),
        }))
        .await
        .unwrap();
        drain(ws).await;
    })
    .await;

    let (session, mut outputs) = authenticated_session(url).await;
    tokio::spawn(Arc::clone(&session).listen());

    let ack = timeout(RECV_TIMEOUT, outputs.subscriptions.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(ack.trades.contains("AAPL"));

    let trade = timeout(RECV_TIMEOUT, outputs.trades.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trade.symbol, "AAPL");
    assert_eq!(trade.trade_id, 96921);
    assert_eq!(trade.conditions, vec!["@".to_string(), "I".to_string()]);

    let quote = timeout(RECV_TIMEOUT, outputs.quotes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(quote.symbol, "AMD");
    assert_eq!(quote.ask_size, 4);

    let error = timeout(RECV_TIMEOUT, outputs.errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error.code, 406);

    let fault = timeout(RECV_TIMEOUT, outputs.faults.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        fault,
        TransportFault::Closed {
            code: 1001,
            reason: "maintenance".to_string()
        }
    );
    assert_eq!(session.state(), SessionState::Faulted);

    // The malformed trade in the second batch is dropped.
    assert!(outputs.trades.try_recv().is_err());
}

#[tokio::test]
async fn every_record_before_closure_reaches_the_sink() {
    let url = serve(|mut ws| async move {
        handshake(&mut ws).await;
        ws.send(Message::text(trade_batch(0..3000))).await.unwrap();
        ws.close(None).await.unwrap();
        drain(ws).await;
    })
    .await;

    let mut config = SessionConfig::new(url);
    config.disconnect = quick_disconnect();
    let (session, outputs) = authenticated_session_with(config).await;

    let sink = Arc::new(CountingSink::default());
    let router = EventRouter::new(
        outputs,
        Arc::clone(&session) as Arc<dyn SessionControl>,
        Arc::clone(&sink) as Arc<dyn EventSink>,
        CancellationToken::new(),
    );

    tokio::spawn(Arc::clone(&session).listen());
    let exit = timeout(Duration::from_secs(10), router.run()).await.unwrap();

    assert_eq!(
        exit,
        RouterExit::Faulted(TransportFault::Closed {
            code: 1005,
            reason: String::new()
        })
    );
    assert_eq!(sink.seen.load(Ordering::SeqCst), 3000);
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn full_trade_queue_does_not_stall_other_kinds() {
    let url = serve(|mut ws| async move {
        handshake(&mut ws).await;
        for batch in 0..10 {
            ws.send(Message::text(trade_batch(batch * 2..batch * 2 + 2)))
                .await
                .unwrap();
        }
        let quote = r#"[{"T":"q","S":"AMD","bx":"U","bp":87.66,"bs":1,"ax":"Q","ap":87.68,"as":4,"t":"2021-02-22T15:51:45.335689322Z","c":["R"],"z":"C"}]"#;
        ws.send(Message::text(quote)).await.unwrap();
        ws.close(None).await.unwrap();
        drain(ws).await;
    })
    .await;

    let mut config = SessionConfig::new(url);
    config.queues.trades_capacity = 1;
    let (session, mut outputs) = authenticated_session_with(config).await;
    tokio::spawn(Arc::clone(&session).listen());

    // Trades are left unread, so their queue is full.
    let quote = timeout(RECV_TIMEOUT, outputs.quotes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(quote.symbol, "AMD");

    // The closure is held back until the blocked trades are delivered.
    assert!(outputs.faults.try_recv().is_err());

    let mut ids = Vec::new();
    for _ in 0..20 {
        let trade = timeout(RECV_TIMEOUT, outputs.trades.recv())
            .await
            .unwrap()
            .unwrap();
        ids.push(trade.trade_id);
    }
    ids.sort_unstable();
    assert_eq!(ids, (0..20).collect::<Vec<_>>());

    let fault = timeout(RECV_TIMEOUT, outputs.faults.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        fault,
        TransportFault::Closed {
            code: 1005,
            reason: String::new()
        }
    );
}

// =============================================================================
// Disconnect
// =============================================================================

#[tokio::test]
async fn disconnect_observes_acknowledgment_without_listener() {
    let url = serve(|mut ws| async move {
        handshake(&mut ws).await;
        drain(ws).await;
    })
    .await;

    let (session, _outputs) = authenticated_session(url).await;

    timeout(RECV_TIMEOUT, session.disconnect()).await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    // Repeated disconnect is a no-op.
    timeout(RECV_TIMEOUT, session.disconnect()).await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn disconnect_while_listening_reports_normal_closure() {
    let url = serve(|mut ws| async move {
        handshake(&mut ws).await;
        drain(ws).await;
    })
    .await;

    let (session, mut outputs) = authenticated_session(url).await;
    tokio::spawn(Arc::clone(&session).listen());
    wait_for_state(&session, SessionState::Listening).await;

    timeout(RECV_TIMEOUT, session.disconnect()).await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    let fault = timeout(RECV_TIMEOUT, outputs.faults.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(fault.is_normal_closure());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn disconnect_gives_up_after_ack_timeout() {
    let url = serve(|mut ws| async move {
        handshake(&mut ws).await;
        // Hold the socket without reading, so no closure reply is sent.
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(ws);
    })
    .await;

    let mut config = SessionConfig::new(url);
    config.disconnect = quick_disconnect();
    let (session, _outputs) = authenticated_session_with(config).await;

    let started = Instant::now();
    timeout(RECV_TIMEOUT, session.disconnect()).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(session.state(), SessionState::Closed);
}
