//! Feed session against an in-process WebSocket server
//!
//! Run with: cargo test -p terminal-ibkr --test feed_session -- --nocapture

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use terminal_core::SessionState;
use terminal_ibkr::{FeedEvent, FeedSession, FeedSessionConfig, ReconnectPolicy};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<tokio::net::TcpStream> {
    let (stream, _) = tokio::time::timeout(TIMEOUT, listener.accept())
        .await
        .expect("client never connected")
        .unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_text(ws: &mut WebSocketStream<tokio::net::TcpStream>) -> String {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("no frame from client")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

async fn next_state(events: &mut mpsc::Receiver<FeedEvent>) -> SessionState {
    loop {
        match tokio::time::timeout(TIMEOUT, events.recv()).await.unwrap() {
            Some(FeedEvent::State(state)) => return state,
            Some(FeedEvent::Ticks(_)) => continue,
            None => panic!("event channel closed"),
        }
    }
}

async fn wait_for(events: &mut mpsc::Receiver<FeedEvent>, wanted: SessionState) {
    while next_state(events).await != wanted {}
}

#[tokio::test]
async fn test_queued_subscribes_flush_in_order_and_ticks_arrive() {
    let (listener, url) = bind().await;
    let config = FeedSessionConfig::new(url).with_reconnect(ReconnectPolicy::disabled());
    let (mut session, mut events) = FeedSession::new(config);

    session.subscribe("AAPL").await.unwrap();
    session.subscribe("MSFT").await.unwrap();
    session.unsubscribe("AAPL").await.unwrap();
    session.connect().unwrap();

    let mut ws = accept(&listener).await;
    assert_eq!(next_text(&mut ws).await, r#"{"op":"subscribe","symbol":"AAPL"}"#);
    assert_eq!(next_text(&mut ws).await, r#"{"op":"subscribe","symbol":"MSFT"}"#);
    assert_eq!(next_text(&mut ws).await, r#"{"op":"unsubscribe","symbol":"AAPL"}"#);

    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"status","data":{}}"#.into()))
        .await
        .unwrap();
    ws.send(Message::Text(
        r#"{"type":"tick","data":[{"symbol":"MSFT","last":402.5,"volume":300}]}"#.into(),
    ))
    .await
    .unwrap();

    let ticks = loop {
        match tokio::time::timeout(TIMEOUT, events.recv()).await.unwrap() {
            Some(FeedEvent::Ticks(ticks)) => break ticks,
            Some(FeedEvent::State(_)) => continue,
            None => panic!("event channel closed"),
        }
    };
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].symbol, "MSFT");
    assert_eq!(ticks[0].last, Some(dec!(402.5)));
    assert_eq!(ticks[0].volume, Some(300));
    assert_eq!(session.state(), SessionState::Connected);

    // Connected: commands go straight out
    session.subscribe("NVDA").await.unwrap();
    assert_eq!(next_text(&mut ws).await, r#"{"op":"subscribe","symbol":"NVDA"}"#);
}

#[tokio::test]
async fn test_reconnect_resubscribes_previous_symbols() {
    let (listener, url) = bind().await;
    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: false,
        ..ReconnectPolicy::default()
    };
    let config = FeedSessionConfig::new(url).with_reconnect(policy);
    let (mut session, mut events) = FeedSession::new(config);
    session.connect().unwrap();

    let mut first = accept(&listener).await;
    wait_for(&mut events, SessionState::Connected).await;
    session.subscribe("AAPL").await.unwrap();
    assert_eq!(next_text(&mut first).await, r#"{"op":"subscribe","symbol":"AAPL"}"#);

    // Server drops the socket
    first.close(None).await.unwrap();
    drop(first);
    wait_for(&mut events, SessionState::Disconnected).await;

    let mut second = accept(&listener).await;
    assert_eq!(next_text(&mut second).await, r#"{"op":"subscribe","symbol":"AAPL"}"#);
    wait_for(&mut events, SessionState::Connected).await;
}

#[tokio::test]
async fn test_close_is_terminal() {
    let (listener, url) = bind().await;
    let config = FeedSessionConfig::new(url).with_reconnect(ReconnectPolicy::disabled());
    let (mut session, mut events) = FeedSession::new(config);
    session.connect().unwrap();

    let _ws = accept(&listener).await;
    wait_for(&mut events, SessionState::Connected).await;

    session.close().await.unwrap();
    wait_for(&mut events, SessionState::Closed).await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.subscribe("AAPL").await.is_err());
}
