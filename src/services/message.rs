//! Echo calls showing header and trailer handling for every call kind.
//!
//! Each handler sets its trailer up front; it goes out with the close. The
//! streaming handlers flush their header before reading anything, so a
//! client may wait on `header()` first without deadlocking.
use rpcduplex::{CallKind, RpcServer, RpcServerError, ServerSession};
use tonic::Status;
use tracing::info;

use super::{recv_request, server_metadata};
use crate::proto::message::{Message, MessageCollection, SERVICE};

pub fn register(server: &mut RpcServer) -> Result<(), RpcServerError> {
    server.register(&format!("/{SERVICE}/Unary"), CallKind::Unary, unary)?;
    server.register(
        &format!("/{SERVICE}/ClientStream"),
        CallKind::ClientStreaming,
        client_stream,
    )?;
    server.register(
        &format!("/{SERVICE}/ServerStream"),
        CallKind::ServerStreaming,
        server_stream,
    )?;
    server.register(
        &format!("/{SERVICE}/BidirectionalStream"),
        CallKind::Bidirectional,
        bidirectional_stream,
    )?;
    Ok(())
}

async fn unary(mut session: ServerSession<Message, Message>) -> Result<(), Status> {
    info!(metadata = %session.request_metadata(), "Unary call");
    // A unary client only reads the header after its request went out, so
    // queueing it is enough.
    session.set_header(server_metadata("server.Unary header"))?;
    session.set_trailer(server_metadata("server.Unary trailer"))?;

    let message = recv_request(&mut session).await?;
    info!(content = %message.content, "Unary received message");
    session.send(&message).await?;
    Ok(())
}

async fn client_stream(
    mut session: ServerSession<Message, MessageCollection>,
) -> Result<(), Status> {
    info!(metadata = %session.request_metadata(), "ClientStream call");
    session.set_header(server_metadata("server.ClientStream header"))?;
    session.send_header().await?;
    session.set_trailer(server_metadata("server.ClientStream trailer"))?;

    let mut value = Vec::new();
    while let Some(message) = session.recv().await? {
        info!(content = %message.content, "ClientStream received message");
        value.push(message);
    }
    session.send(&MessageCollection { value }).await?;
    Ok(())
}

async fn server_stream(
    mut session: ServerSession<MessageCollection, Message>,
) -> Result<(), Status> {
    info!(metadata = %session.request_metadata(), "ServerStream call");
    session.set_header(server_metadata("server.ServerStream header"))?;
    session.send_header().await?;
    session.set_trailer(server_metadata("server.ServerStream trailer"))?;

    let collection = recv_request(&mut session).await?;
    for message in &collection.value {
        session.send(message).await?;
    }
    Ok(())
}

async fn bidirectional_stream(mut session: ServerSession<Message, Message>) -> Result<(), Status> {
    info!(metadata = %session.request_metadata(), "BidirectionalStream call");
    session.set_header(server_metadata("server.BidirectionalStream header"))?;
    session.send_header().await?;
    session.set_trailer(server_metadata("server.BidirectionalStream trailer"))?;

    while let Some(message) = session.recv().await? {
        info!(content = %message.content, "BidirectionalStream received message");
        session.send(&message).await?;
    }
    Ok(())
}
