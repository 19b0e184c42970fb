//! RPC services registered on the shared [`RpcServer`].
pub mod greeter;
pub mod message;
pub mod poem;
pub mod user;

use std::sync::Arc;

use rpcduplex::{CallInfo, Metadata, RpcServer, RpcServerError, ServerSession};
use tonic::Status;
use tracing::debug;

use crate::proto::unix_now;
use crate::store::{PoemStore, UserStore};

/// Metadata key the token interceptor checks.
pub const TOKEN_KEY: &str = "token";

/// Header and trailer key the token interceptor fills in for accepted calls.
pub const USER_KEY: &str = "user";

/// Register the User, Poem, Message and Greeter services.
pub fn register_all(
    server: &mut RpcServer,
    users: Arc<UserStore>,
    poems: Arc<PoemStore>,
) -> Result<(), RpcServerError> {
    user::register(server, users)?;
    poem::register(server, poems)?;
    message::register(server)?;
    greeter::register(server)?;
    Ok(())
}

/// Rejects calls that carry no `token` metadata. Accepted calls get a
/// random `user` in both their header and their trailer.
pub fn require_token(call: &mut CallInfo) -> Result<(), Status> {
    debug!(call_id = %call.id, path = %call.path, metadata = %call.metadata, "Checking call token");
    match call.metadata.get(TOKEN_KEY) {
        Some(token) if !token.is_empty() => {
            call.header.append(USER_KEY, random_string(4));
            call.trailer.append(USER_KEY, random_string(4));
            Ok(())
        }
        _ => {
            debug!(call_id = %call.id, path = %call.path, "Rejected call without token");
            Err(Status::unauthenticated("missing token"))
        }
    }
}

/// The single request of a unary or server-streaming call.
pub(crate) async fn recv_request<Req, Resp>(
    session: &mut ServerSession<Req, Resp>,
) -> Result<Req, Status>
where
    Req: prost::Message + Default,
{
    session
        .recv()
        .await?
        .ok_or_else(|| Status::invalid_argument("missing request message"))
}

/// Header or trailer metadata describing where and when a response was made.
pub fn server_metadata(from: &str) -> Metadata {
    let mut md = Metadata::new();
    md.append("timestamp", unix_now().to_string());
    md.append("from", from);
    md.append("random", random_string(8));
    md
}

fn random_string(len: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string()[..len].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcduplex::{CallId, CallKind};

    fn call(metadata: Metadata) -> CallInfo {
        CallInfo::new(
            CallId::new(),
            "/user.UserService/GetUser",
            CallKind::Unary,
            metadata,
        )
    }

    #[test]
    fn test_require_token() {
        let mut md = Metadata::new();
        md.append("token", "secret");
        let mut accepted = call(md);
        assert!(require_token(&mut accepted).is_ok());
        assert_eq!(accepted.header.get(USER_KEY).map(str::len), Some(4));
        assert_eq!(accepted.trailer.get(USER_KEY).map(str::len), Some(4));

        let mut rejected = call(Metadata::new());
        let err = require_token(&mut rejected).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
        assert!(rejected.header.is_empty());
    }

    #[test]
    fn test_server_metadata_keys() {
        let md = server_metadata("server.Unary header");
        assert_eq!(md.get("from"), Some("server.Unary header"));
        assert_eq!(md.get("random").map(str::len), Some(8));
        assert!(md.contains_key("timestamp"));
    }
}
