//! Reader task tests: normal-path routing and read-failure handling over a
//! channel-backed stream standing in for the transport.

use futures::channel::mpsc;
use iridium_stomp_core::{Connection, ConnectionState, Frame, MessageData, ReadError, StompItem};
use std::time::Duration;
use tokio::time::timeout;

type Inbound = Result<StompItem, ReadError>;

async fn started() -> (Connection, mpsc::UnboundedSender<Inbound>) {
    let conn = Connection::builder()
        .session("reader")
        .heartbeat(None, Some(Duration::from_secs(30)))
        .build()
        .unwrap();
    conn.start(futures::sink::drain()).unwrap();
    let (tx, rx) = mpsc::unbounded::<Inbound>();
    conn.attach_reader(rx).unwrap();
    (conn, tx)
}

#[tokio::test]
async fn attach_reader_requires_connected() {
    let conn = Connection::builder().build().unwrap();
    let (_tx, rx) = mpsc::unbounded::<Inbound>();
    assert!(conn.attach_reader(rx).is_err());
}

#[tokio::test]
async fn reader_routes_frames() {
    let (conn, tx) = started().await;
    let mut sub = conn.subscribe("s1").await.unwrap();

    let message = Frame::new("MESSAGE").header("subscription", "s1");
    let receipt = Frame::new("RECEIPT").header("receipt-id", "r1");
    tx.unbounded_send(Ok(StompItem::Heartbeat)).unwrap();
    tx.unbounded_send(Ok(StompItem::Frame(message.clone()))).unwrap();
    tx.unbounded_send(Ok(StompItem::Frame(receipt.clone()))).unwrap();

    assert_eq!(sub.recv().await, Some(MessageData::Message(message)));
    assert_eq!(conn.next_message().await, Some(MessageData::Message(receipt)));
    assert!(conn.connected());
    conn.shutdown();
}

#[tokio::test]
async fn read_error_fans_out_and_shuts_down() {
    let (conn, tx) = started().await;
    let mut a = conn.subscribe("a").await.unwrap();
    let mut b = conn.subscribe("b").await.unwrap();

    let err = ReadError::Protocol("bad frame".into());
    tx.unbounded_send(Err(err.clone())).unwrap();

    let expected = MessageData::Error(err);
    assert_eq!(conn.next_message().await, Some(expected.clone()));
    assert_eq!(a.recv().await, Some(expected.clone()));
    assert_eq!(b.recv().await, Some(expected));

    for _ in 0..100 {
        if conn.state() == ConnectionState::Disconnected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.receive_ticker_interval(), 0);
}

#[tokio::test]
async fn end_of_stream_is_reported() {
    let (conn, tx) = started().await;
    let mut sub = conn.subscribe("s").await.unwrap();

    drop(tx);

    let md = timeout(Duration::from_secs(1), conn.next_message())
        .await
        .expect("no end-of-stream notification")
        .unwrap();
    assert_eq!(md.error(), Some(&ReadError::EndOfStream));
    assert_eq!(
        sub.recv().await.and_then(|md| md.into_result().err()),
        Some(ReadError::EndOfStream)
    );
}

#[tokio::test]
async fn shutdown_stops_the_reader() {
    let (conn, tx) = started().await;
    conn.shutdown();

    // give the reader a chance to observe the stop signal
    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = tx.unbounded_send(Ok(StompItem::Frame(Frame::new("RECEIPT"))));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(conn.try_next_message().is_none());
}
