use rpcduplex::{CallKind, RpcServer, RpcServerError, ServerSession};
use tonic::Status;

use super::recv_request;
use crate::proto::greeter::{HelloReply, HelloRequest, SERVICE};

pub fn register(server: &mut RpcServer) -> Result<(), RpcServerError> {
    server.register(&format!("/{SERVICE}/SayHello"), CallKind::Unary, say_hello)?;
    server.register(
        &format!("/{SERVICE}/SayHelloAgain"),
        CallKind::Unary,
        say_hello_again,
    )?;
    Ok(())
}

async fn say_hello(mut session: ServerSession<HelloRequest, HelloReply>) -> Result<(), Status> {
    let request = recv_request(&mut session).await?;
    session
        .send(&HelloReply {
            message: format!("hello {}", request.name),
        })
        .await?;
    Ok(())
}

async fn say_hello_again(
    mut session: ServerSession<HelloRequest, HelloReply>,
) -> Result<(), Status> {
    let request = recv_request(&mut session).await?;
    session
        .send(&HelloReply {
            message: format!("hello {} again", request.name),
        })
        .await?;
    Ok(())
}
