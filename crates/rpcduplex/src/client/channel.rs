use std::sync::Arc;

use tracing::debug;

use crate::client::config::{ClientCallInfo, RpcClientConfig};
use crate::error::{SessionError, TransportError};
use crate::metadata::Metadata;
use crate::server::RpcServer;
use crate::session::{CallContext, CallKind, ClientSession};
use crate::transport::memory;

/// Response of a unary call together with the server's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryResponse<M> {
    pub header: Metadata,
    pub message: M,
    pub trailer: Metadata,
}

/// Opens client sessions against an [`RpcServer`] in the same process.
///
/// Each call gets its own in-memory transport pair; the server side is served
/// exactly as an HTTP call would be.
#[derive(Clone)]
pub struct LocalChannel {
    server: Arc<RpcServer>,
    config: RpcClientConfig,
}

impl LocalChannel {
    pub fn new(server: Arc<RpcServer>, config: RpcClientConfig) -> Self {
        Self { server, config }
    }

    pub fn server(&self) -> &Arc<RpcServer> {
        &self.server
    }

    /// Open a call that nobody but the server can cancel.
    pub async fn open<Req, Resp>(
        &self,
        path: &str,
        kind: CallKind,
        metadata: Metadata,
    ) -> Result<ClientSession<Req, Resp>, SessionError> {
        self.open_with(path, kind, metadata, CallContext::background())
            .await
    }

    /// Open a call bound to `ctx`. Cancelling `ctx` makes every blocked
    /// operation of the returned session fail with [`SessionError::Cancelled`].
    ///
    /// The configured interceptors run first; a rejection is returned as a
    /// [`SessionError::Status`] without contacting the server.
    pub async fn open_with<Req, Resp>(
        &self,
        path: &str,
        kind: CallKind,
        metadata: Metadata,
        ctx: CallContext,
    ) -> Result<ClientSession<Req, Resp>, SessionError> {
        let mut request_metadata = self.config.metadata.clone();
        request_metadata.merge_append(metadata);

        let mut call = ClientCallInfo {
            path: path.to_string(),
            kind,
            metadata: request_metadata,
        };
        for interceptor in &self.config.interceptors {
            if let Err(status) = interceptor(&mut call) {
                debug!(path = %path, code = ?status.code(), "Call rejected by client interceptor");
                return Err(SessionError::from_status(&status));
            }
        }

        let (client, server) = memory::pair(self.config.channel_capacity);
        self.server.serve_transport(path, server);

        debug!(call_id = %ctx.id(), path = %path, ?kind, "Opening local call");
        ClientSession::open(client, ctx, kind, call.metadata).await
    }

    /// Make a unary call.
    pub async fn unary<Req, Resp>(
        &self,
        path: &str,
        request: &Req,
        metadata: Metadata,
    ) -> Result<UnaryResponse<Resp>, SessionError>
    where
        Req: prost::Message + std::fmt::Debug,
        Resp: prost::Message + Default + std::fmt::Debug,
    {
        let mut session = self
            .open::<Req, Resp>(path, CallKind::Unary, metadata)
            .await?;
        send_request(&mut session, request).await?;

        let header = session.header().await?;
        let message = session
            .recv()
            .await?
            .ok_or_else(|| SessionError::violation("unary call ended without a response"))?;
        // Drain the end of stream so the trailer is available.
        session.recv().await?;

        debug!(path = %path, ?request, response = ?message, "Unary call completed");
        Ok(UnaryResponse {
            header,
            message,
            trailer: session.trailer(),
        })
    }

    /// Start a server-streaming call. The request is sent and the send
    /// direction closed; the caller reads responses from the returned session.
    pub async fn server_streaming<Req, Resp>(
        &self,
        path: &str,
        request: &Req,
        metadata: Metadata,
    ) -> Result<ClientSession<Req, Resp>, SessionError>
    where
        Req: prost::Message,
    {
        let mut session = self
            .open::<Req, Resp>(path, CallKind::ServerStreaming, metadata)
            .await?;
        send_request(&mut session, request).await?;
        Ok(session)
    }
}

/// Send the single request of a call and half-close. A server that already
/// finished makes the send fail with `Closed`; its status is then read by the
/// next receive instead.
async fn send_request<Req, Resp>(
    session: &mut ClientSession<Req, Resp>,
    request: &Req,
) -> Result<(), SessionError>
where
    Req: prost::Message,
{
    let sent = match session.send(request).await {
        Ok(()) => session.close_send().await,
        Err(err) => Err(err),
    };
    match sent {
        Err(SessionError::Transport(TransportError::Closed)) => Ok(()),
        other => other,
    }
}
