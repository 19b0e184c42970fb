mod common;

use std::sync::{Arc, Mutex};

use rpcduplex::{
    CallKind, LocalChannel, Metadata, RpcClientConfig, RpcServer, ServerSession, SessionError,
    drive,
};
use tokio::time::timeout;
use tonic::{Code, Status};

use common::{Ack, DEADLINE, Item, ack, item};

/// Acknowledges every item as soon as it arrives.
async fn ack_each(mut session: ServerSession<Item, Ack>) -> Result<(), Status> {
    while let Some(item) = session.recv().await? {
        session.send(&ack(&item.name)).await?;
    }
    Ok(())
}

/// Reads every item before acknowledging any of them.
async fn ack_after_all(mut session: ServerSession<Item, Ack>) -> Result<(), Status> {
    let mut names = Vec::new();
    while let Some(item) = session.recv().await? {
        names.push(item.name);
    }
    for name in names {
        session.send(&ack(&name)).await?;
    }
    Ok(())
}

/// Fails after the first item.
async fn reject_second(mut session: ServerSession<Item, Ack>) -> Result<(), Status> {
    if let Some(item) = session.recv().await? {
        session.send(&ack(&item.name)).await?;
    }
    Err(Status::invalid_argument("only one item allowed"))
}

fn channel(capacity: usize) -> LocalChannel {
    let mut server = RpcServer::default();
    server
        .register("/batch.Batch/AckEach", CallKind::Bidirectional, ack_each)
        .unwrap();
    server
        .register("/batch.Batch/AckAfterAll", CallKind::Bidirectional, ack_after_all)
        .unwrap();
    server
        .register("/batch.Batch/RejectSecond", CallKind::Bidirectional, reject_second)
        .unwrap();
    LocalChannel::new(
        Arc::new(server),
        RpcClientConfig::default().with_channel_capacity(capacity),
    )
}

fn items(n: usize) -> Vec<Item> {
    (0..n).map(|i| item(&format!("poem-{i}"))).collect()
}

async fn run(
    channel: &LocalChannel,
    path: &str,
    inputs: Vec<Item>,
) -> (Result<rpcduplex::DuplexOutcome, SessionError>, Vec<String>) {
    let session = channel
        .open::<Item, Ack>(path, CallKind::Bidirectional, Metadata::new())
        .await
        .unwrap();
    let (sender, receiver) = session.split();

    let acks = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&acks);
    let outcome = timeout(
        DEADLINE,
        drive(sender, receiver, inputs, move |ack: Ack| {
            sink.lock().unwrap().push(ack.name);
        }),
    )
    .await
    .expect("duplex exchange must not deadlock");

    let acks = acks.lock().unwrap().clone();
    (outcome, acks)
}

#[tokio::test]
async fn test_every_item_is_acknowledged() {
    let channel = channel(4);
    let (outcome, acks) = run(&channel, "/batch.Batch/AckEach", items(3)).await;

    let outcome = outcome.unwrap();
    assert_eq!(outcome.sent, 3);
    assert_eq!(outcome.received, 3);
    assert_eq!(acks, ["poem-0", "poem-1", "poem-2"]);
}

#[tokio::test]
async fn test_acks_out_of_lockstep() {
    let channel = channel(2);
    let (outcome, acks) = run(&channel, "/batch.Batch/AckAfterAll", items(3)).await;

    assert_eq!(outcome.unwrap().received, 3);
    assert_eq!(acks.len(), 3);
}

#[tokio::test]
async fn test_no_deadlock_when_buffers_fill() {
    // Far more items than either direction can buffer; a send-all-then-read
    // client would stall once the server blocks on its acks.
    let channel = channel(1);
    let (outcome, acks) = run(&channel, "/batch.Batch/AckEach", items(200)).await;

    let outcome = outcome.unwrap();
    assert_eq!(outcome.sent, 200);
    assert_eq!(outcome.received, 200);
    assert_eq!(acks.first().map(String::as_str), Some("poem-0"));
    assert_eq!(acks.last().map(String::as_str), Some("poem-199"));
}

#[tokio::test]
async fn test_server_failure_is_reported_once() {
    let channel = channel(4);
    let (outcome, acks) = run(&channel, "/batch.Batch/RejectSecond", items(5)).await;

    let err = outcome.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(acks, ["poem-0"]);
}

#[tokio::test]
async fn test_callback_panic_becomes_error() {
    let channel = channel(4);
    let session = channel
        .open::<Item, Ack>("/batch.Batch/AckEach", CallKind::Bidirectional, Metadata::new())
        .await
        .unwrap();
    let (sender, receiver) = session.split();

    let mut seen = 0;
    let result = timeout(
        DEADLINE,
        drive(sender, receiver, items(10), move |_ack: Ack| {
            seen += 1;
            if seen == 2 {
                panic!("callback exploded");
            }
        }),
    )
    .await
    .expect("a panicking callback must not hang the exchange");

    assert_eq!(
        result.unwrap_err(),
        SessionError::CallbackPanic("callback exploded".to_string())
    );
}
