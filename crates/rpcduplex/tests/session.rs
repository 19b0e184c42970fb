mod common;

use std::time::Duration;

use bytes::Bytes;
use prost::Message;
use rpcduplex::transport::memory;
use rpcduplex::{
    CallContext, CallKind, ClientSession, Frame, Metadata, ServerSession, SessionError,
    StreamState, TransportError,
};
use tokio::time::timeout;
use tonic::{Code, Status};

use common::{DEADLINE, Item, item, md};

async fn connect(
    kind: CallKind,
    capacity: usize,
) -> (ClientSession<Item, Item>, ServerSession<Item, Item>) {
    let (client_t, server_t) = memory::pair(capacity);
    let client = ClientSession::open(client_t, CallContext::background(), kind, md(&[("token", "t")]))
        .await
        .unwrap();
    let server = ServerSession::accept(server_t, CallContext::background(), kind)
        .await
        .unwrap();
    (client, server)
}

#[tokio::test]
async fn test_messages_arrive_in_order() {
    let (mut client, mut server) = connect(CallKind::ServerStreaming, 4).await;
    client.send(&item("request")).await.unwrap();
    client.close_send().await.unwrap();

    let producer = tokio::spawn(async move {
        assert_eq!(server.recv().await.unwrap(), Some(item("request")));
        for i in 0..50 {
            server.send(&item(&i.to_string())).await.unwrap();
        }
        server.close_send().await.unwrap();
    });

    let mut received = Vec::new();
    while let Some(msg) = client.recv().await.unwrap() {
        received.push(msg.name);
    }
    producer.await.unwrap();

    let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
    assert_eq!(received, expected);
    assert_eq!(client.state(), StreamState::Closed);
}

#[tokio::test]
async fn test_set_header_keeps_last_value_until_flush() {
    let (mut client, mut server) = connect(CallKind::Unary, 4).await;

    server.set_header(md(&[("v", "1")])).unwrap();
    server.set_header(md(&[("v", "2")])).unwrap();
    server.send(&item("reply")).await.unwrap();
    // Already flushed: ignored without error.
    server.set_header(md(&[("v", "3")])).unwrap();
    server.close_send().await.unwrap();

    assert_eq!(client.header().await.unwrap(), md(&[("v", "2")]));
    assert_eq!(client.recv().await.unwrap(), Some(item("reply")));
    assert_eq!(client.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_explicit_header_flush() {
    let (mut client, mut server) = connect(CallKind::Bidirectional, 4).await;

    server.set_header(md(&[("from", "server")])).unwrap();
    server.send_header().await.unwrap();
    assert_eq!(server.send_state(), StreamState::Streaming);

    let header = timeout(DEADLINE, client.header()).await.unwrap().unwrap();
    assert_eq!(header.get("from"), Some("server"));
}

#[tokio::test]
async fn test_trailer_only_visible_after_end() {
    let (mut client, mut server) = connect(CallKind::ServerStreaming, 4).await;

    server.set_trailer(md(&[("timestamp", "later")])).unwrap();
    server.send(&item("one")).await.unwrap();

    assert!(client.trailer().is_empty());
    assert_eq!(client.recv().await.unwrap(), Some(item("one")));
    assert!(client.trailer().is_empty());

    server.close_send().await.unwrap();
    assert_eq!(client.recv().await.unwrap(), None);
    assert_eq!(client.trailer().get("timestamp"), Some("later"));

    // Setting a trailer after close is ignored.
    server.set_trailer(md(&[("timestamp", "too late")])).unwrap();
}

#[tokio::test]
async fn test_header_is_empty_when_server_ends_cleanly_without_one() {
    let (mut client, mut server) = connect(CallKind::Unary, 4).await;

    server.close_send().await.unwrap();

    assert_eq!(client.header().await.unwrap(), Metadata::new());
    assert_eq!(client.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_header_reports_failure_status_of_headerless_end() {
    let (mut client, mut server) = connect(CallKind::Unary, 4).await;

    server
        .close_with_status(Status::not_found("no such poem"))
        .await
        .unwrap();

    let expected = SessionError::Status {
        code: Code::NotFound,
        message: "no such poem".to_string(),
    };
    assert_eq!(client.header().await.unwrap_err(), expected);
    assert_eq!(client.header().await.unwrap_err(), expected);
    assert_eq!(client.recv().await.unwrap_err(), expected);
}

#[tokio::test]
async fn test_server_reports_receive_failure_to_client() {
    let (mut raw, server_t) = memory::pair(8);
    raw.sink
        .send_frame(Frame::Header(Metadata::new()))
        .await
        .unwrap();
    raw.sink
        .send_frame(Frame::Data(Bytes::from_static(&[0xff, 0xff, 0xff])))
        .await
        .unwrap();

    let mut server =
        ServerSession::<Item, Item>::accept(server_t, CallContext::background(), CallKind::Unary)
            .await
            .unwrap();
    server.set_header(md(&[("from", "server")])).unwrap();
    let err = server.recv().await.unwrap_err();
    assert!(matches!(err, SessionError::Decode(_)));

    // The failure is recorded, yet the final status still goes out alone.
    server.close_with_status(Status::from(err)).await.unwrap();
    assert_eq!(server.send_state(), StreamState::HalfClosed);

    match raw.source.recv_frame().await.unwrap() {
        Some(Frame::End(end)) => assert_eq!(end.code, Code::InvalidArgument),
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn test_error_status_is_recorded_for_every_later_operation() {
    let (mut client, mut server) = connect(CallKind::Bidirectional, 4).await;

    server.set_trailer(md(&[("reason", "quota")])).unwrap();
    server
        .close_with_status(Status::resource_exhausted("slow down"))
        .await
        .unwrap();

    let first = client.recv().await.unwrap_err();
    assert_eq!(first.code(), Code::ResourceExhausted);
    assert_eq!(client.trailer().get("reason"), Some("quota"));

    assert_eq!(client.send(&item("late")).await.unwrap_err(), first);
    assert_eq!(client.recv().await.unwrap_err(), first);
    assert_eq!(client.state(), StreamState::Errored);
}

#[tokio::test]
async fn test_vanished_peer_is_transport_error() {
    let (mut client, server) = connect(CallKind::Unary, 4).await;
    drop(server);

    assert_eq!(
        client.recv().await.unwrap_err(),
        SessionError::Transport(TransportError::Closed)
    );
}

#[tokio::test]
async fn test_cancel_breaks_header_deadlock() {
    let (client_t, server_t) = memory::pair(4);
    let (ctx, cancel) = CallContext::new();
    let mut client = ClientSession::<Item, Item>::open(
        client_t,
        ctx,
        CallKind::Bidirectional,
        Metadata::new(),
    )
    .await
    .unwrap();
    let mut server =
        ServerSession::<Item, Item>::accept(server_t, CallContext::background(), CallKind::Bidirectional)
            .await
            .unwrap();

    // The server waits for a message before sending its header, and the
    // client waits for the header before sending: neither makes progress.
    let server_task = tokio::spawn(async move { server.recv().await });
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let result = timeout(DEADLINE, client.header())
        .await
        .expect("cancellation must unblock header()");
    assert_eq!(result, Err(SessionError::Cancelled));

    drop(client);
    let server_result = timeout(DEADLINE, server_task).await.unwrap().unwrap();
    assert_eq!(
        server_result,
        Err(SessionError::Transport(TransportError::Closed))
    );
}

#[tokio::test]
async fn test_cancel_unblocks_full_send() {
    let (client_t, _server_t) = memory::pair(1);
    let (ctx, cancel) = CallContext::new();
    // The header fills the only slot; the peer never reads.
    let mut client = ClientSession::<Item, Item>::open(
        client_t,
        ctx,
        CallKind::ClientStreaming,
        Metadata::new(),
    )
    .await
    .unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let result = timeout(DEADLINE, client.send(&item("stuck")))
        .await
        .expect("cancellation must unblock send()");
    assert_eq!(result, Err(SessionError::Cancelled));
}

#[tokio::test]
async fn test_second_message_on_single_message_direction_is_flagged() {
    let (mut raw, server_t) = memory::pair(8);
    raw.sink
        .send_frame(Frame::Header(Metadata::new()))
        .await
        .unwrap();
    for name in ["a", "b"] {
        let data = Bytes::from(item(name).encode_to_vec());
        raw.sink.send_frame(Frame::Data(data)).await.unwrap();
    }

    let mut server =
        ServerSession::<Item, Item>::accept(server_t, CallContext::background(), CallKind::Unary)
            .await
            .unwrap();
    assert_eq!(server.recv().await.unwrap(), Some(item("a")));
    assert!(matches!(
        server.recv().await,
        Err(SessionError::ProtocolViolation(_))
    ));
}

#[tokio::test]
async fn test_data_before_header_is_rejected() {
    let (mut raw, server_t) = memory::pair(8);
    raw.sink
        .send_frame(Frame::Data(Bytes::from_static(b"")))
        .await
        .unwrap();

    let result =
        ServerSession::<Item, Item>::accept(server_t, CallContext::background(), CallKind::Unary)
            .await;
    assert!(matches!(result, Err(SessionError::ProtocolViolation(_))));
}

#[tokio::test]
async fn test_split_halves_run_independently() {
    let (client, mut server) = connect(CallKind::Bidirectional, 2).await;
    let (mut sender, receiver) = client.split();

    let echo = tokio::spawn(async move {
        while let Some(msg) = server.recv().await.unwrap() {
            server.send(&msg).await.unwrap();
        }
        server.close_send().await.unwrap();
    });

    let reader = tokio::spawn(async move {
        use futures::TryStreamExt;
        receiver.into_stream().try_collect::<Vec<_>>().await
    });

    for i in 0..20 {
        sender.send(&item(&i.to_string())).await.unwrap();
    }
    sender.close_send().await.unwrap();

    let echoed = timeout(DEADLINE, reader).await.unwrap().unwrap().unwrap();
    assert_eq!(echoed.len(), 20);
    assert_eq!(echoed[19], item("19"));
    echo.await.unwrap();
}
