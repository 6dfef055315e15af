//! Binance adapter against a local websocket server: reconnect, resubscribe,
//! malformed frames and heartbeats.

use std::collections::BTreeSet;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use papertrail_core::Tick;
use papertrail_runner::{BinanceTradeFeed, FeedConfig, Subscription, TickFeed};

fn trade(symbol: &str, price: &str, millis: i64) -> Message {
    let text = format!(
        r#"{{"stream":"{lower}@trade","data":{{"e":"trade","E":{millis},"s":"{symbol}","t":1,"p":"{price}","q":"0.01","T":{millis}}}}}"#,
        lower = symbol.to_lowercase()
    );
    Message::Text(text.into())
}

/// Complete the websocket handshake, reporting the requested path.
async fn accept(stream: TcpStream, paths: mpsc::UnboundedSender<String>) -> WebSocketStream<TcpStream> {
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let _ = paths.send(req.uri().to_string());
        Ok(resp)
    };
    accept_hdr_async(stream, callback).await.unwrap()
}

async fn next_tick(sub: &mut Subscription) -> Tick {
    tokio::time::timeout(Duration::from_secs(10), sub.next())
        .await
        .expect("no tick within 10s")
        .expect("feed ended")
}

#[tokio::test]
async fn dropped_connection_resubscribes_to_the_same_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (path_tx, mut path_rx) = mpsc::unbounded_channel::<String>();
    let (pong_tx, pong_rx) = oneshot::channel::<bool>();

    tokio::spawn(async move {
        // First session: one trade, one garbage frame, then the socket dies
        // without a close handshake.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept(stream, path_tx.clone()).await;
        ws.send(trade("BTCUSDT", "100.5", 1_000)).await.unwrap();
        ws.send(Message::Text("not json".into())).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept(stream, path_tx).await;
        ws.send(trade("BTCUSDT", "101.0", 2_000)).await.unwrap();
        ws.send(Message::Ping(vec![7, 7].into())).await.unwrap();
        let answered = loop {
            match ws.next().await {
                Some(Ok(Message::Pong(_))) => break true,
                Some(Ok(_)) => continue,
                _ => break false,
            }
        };
        let _ = pong_tx.send(answered);
        while let Some(Ok(_)) = ws.next().await {}
    });

    let config = FeedConfig {
        endpoint: format!("ws://{addr}"),
        reconnect_backoff_ms: 10,
        connect_timeout_ms: 2_000,
        idle_timeout_ms: 10_000,
        channel_capacity: 16,
        ..FeedConfig::default()
    };
    let symbols: BTreeSet<String> = ["BTCUSDT".to_string()].into_iter().collect();
    let mut sub = BinanceTradeFeed::new(config).subscribe(&symbols);

    let first = next_tick(&mut sub).await;
    assert_eq!(first.symbol, "BTCUSDT");
    assert_eq!(first.price, 100.5);

    let second = next_tick(&mut sub).await;
    assert_eq!(second.price, 101.0);
    assert_eq!(second.event_time.timestamp_millis(), 2_000);

    let first_path = path_rx.recv().await.unwrap();
    let second_path = path_rx.recv().await.unwrap();
    assert_eq!(first_path, "/stream?streams=btcusdt@trade");
    assert_eq!(second_path, first_path);

    let answered = tokio::time::timeout(Duration::from_secs(10), pong_rx)
        .await
        .expect("server never saw a pong")
        .unwrap();
    assert!(answered);

    let stats = sub.stats();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.out_of_order, 0);
}
