use std::sync::Arc;

use rpcduplex::{CallKind, RpcServer, RpcServerError, ServerSession};
use tonic::Status;
use tracing::{debug, info};

use super::recv_request;
use crate::proto::user::{
    CreateUserRequest, CreateUserResponse, DeleteUserRequest, DeleteUserResponse, GetUserRequest,
    GetUserResponse, ListUsersRequest, ListUsersResponse, SERVICE, UpdateUserRequest,
    UpdateUserResponse,
};
use crate::store::{StoreError, UserStore};

pub fn register(server: &mut RpcServer, store: Arc<UserStore>) -> Result<(), RpcServerError> {
    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/CreateUser"),
        CallKind::Unary,
        move |session| create_user(Arc::clone(&s), session),
    )?;

    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/GetUser"),
        CallKind::Unary,
        move |session| get_user(Arc::clone(&s), session),
    )?;

    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/UpdateUser"),
        CallKind::Unary,
        move |session| update_user(Arc::clone(&s), session),
    )?;

    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/DeleteUser"),
        CallKind::Unary,
        move |session| delete_user(Arc::clone(&s), session),
    )?;

    server.register(
        &format!("/{SERVICE}/ListUsers"),
        CallKind::ServerStreaming,
        move |session| list_users(Arc::clone(&store), session),
    )?;

    Ok(())
}

async fn create_user(
    store: Arc<UserStore>,
    mut session: ServerSession<CreateUserRequest, CreateUserResponse>,
) -> Result<(), Status> {
    let request = recv_request(&mut session).await?;
    let user = request
        .user
        .ok_or_else(|| Status::invalid_argument("no user"))?;

    let user = store.create(user, request.create_mask.as_ref());
    info!(id = user.id, name = %user.name, "Created user");
    session
        .send(&CreateUserResponse { user: Some(user) })
        .await?;
    Ok(())
}

async fn get_user(
    store: Arc<UserStore>,
    mut session: ServerSession<GetUserRequest, GetUserResponse>,
) -> Result<(), Status> {
    let request = recv_request(&mut session).await?;
    let user = store
        .get(request.id)
        .ok_or_else(|| Status::failed_precondition("can not get user"))?;

    session.send(&GetUserResponse { user: Some(user) }).await?;
    Ok(())
}

async fn update_user(
    store: Arc<UserStore>,
    mut session: ServerSession<UpdateUserRequest, UpdateUserResponse>,
) -> Result<(), Status> {
    let request = recv_request(&mut session).await?;
    let user = request
        .user
        .ok_or_else(|| Status::invalid_argument("no user"))?;

    let user = store
        .update(user, request.update_mask.as_ref())
        .map_err(|err| match err {
            StoreError::UserNotFound(_) | StoreError::EmptyMask => {
                Status::failed_precondition(format!("can not update user: {err}"))
            }
            other => Status::internal(other.to_string()),
        })?;

    info!(id = user.id, "Updated user");
    session
        .send(&UpdateUserResponse { user: Some(user) })
        .await?;
    Ok(())
}

async fn delete_user(
    store: Arc<UserStore>,
    mut session: ServerSession<DeleteUserRequest, DeleteUserResponse>,
) -> Result<(), Status> {
    let request = recv_request(&mut session).await?;
    let user = store
        .delete(request.id)
        .ok_or_else(|| Status::failed_precondition("can not delete user"))?;

    info!(id = user.id, "Deleted user");
    session
        .send(&DeleteUserResponse { user: Some(user) })
        .await?;
    Ok(())
}

async fn list_users(
    store: Arc<UserStore>,
    mut session: ServerSession<ListUsersRequest, ListUsersResponse>,
) -> Result<(), Status> {
    recv_request(&mut session).await?;

    for user in store.list() {
        debug!(id = user.id, "Sending user");
        session
            .send(&ListUsersResponse { user: Some(user) })
            .await
            .map_err(|e| Status::internal(format!("failed to send user: {e}")))?;
    }
    Ok(())
}
