use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tonic::Status;

use crate::metadata::Metadata;
use crate::server::calls::CallGuard;
use crate::session::{CallContext, CallId, CallKind, ServerSession};
use crate::transport::Transport;

/// What an interceptor gets to see before a call reaches its handler.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub id: CallId,
    pub path: String,
    pub kind: CallKind,
    /// The client's request metadata.
    pub metadata: Metadata,
    /// Response header metadata, sent ahead of the handler's own header.
    pub header: Metadata,
    /// Trailer metadata, sent ahead of the handler's own trailer.
    pub trailer: Metadata,
}

impl CallInfo {
    pub fn new(id: CallId, path: impl Into<String>, kind: CallKind, metadata: Metadata) -> Self {
        Self {
            id,
            path: path.into(),
            kind,
            metadata,
            header: Metadata::new(),
            trailer: Metadata::new(),
        }
    }
}

/// Inspects a call before its handler runs and may add response metadata.
/// An `Err` ends the call with that status.
pub type Interceptor = Arc<dyn Fn(&mut CallInfo) -> Result<(), Status> + Send + Sync + 'static>;

/// A boxed method handler.
///
/// The handler owns the server session for the whole call. Returning `Ok`
/// closes the call with an OK status and the queued trailer, returning `Err`
/// closes it with that status; both are no-ops if the handler closed the
/// session itself.
pub type HandlerFn<Req, Resp> = Arc<
    dyn Fn(ServerSession<Req, Resp>) -> BoxFuture<'static, Result<(), Status>>
        + Send
        + Sync
        + 'static,
>;

/// Everything a spawned call needs besides the handler.
pub(crate) struct PendingCall {
    pub path: String,
    pub transport: Transport,
    pub ctx: CallContext,
    pub guard: CallGuard,
    pub interceptors: Arc<Vec<Interceptor>>,
}

/// A type-erased handler that can be stored in a HashMap.
///
/// This trait allows us to store handlers with different message types in a
/// single registry.
pub(crate) trait ErasedHandler: Send + Sync {
    fn kind(&self) -> CallKind;

    /// Spawn a task that accepts the call, runs the interceptors and the
    /// handler, and closes the call with the outcome.
    fn spawn_call(&self, call: PendingCall) -> JoinHandle<()>;
}

/// A typed handler for one method.
pub(crate) struct TypedHandler<Req, Resp> {
    kind: CallKind,
    handler: HandlerFn<Req, Resp>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> TypedHandler<Req, Resp> {
    pub fn new(kind: CallKind, handler: HandlerFn<Req, Resp>) -> Self {
        Self {
            kind,
            handler,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp> ErasedHandler for TypedHandler<Req, Resp>
where
    Req: prost::Message + Default + Send + 'static,
    Resp: prost::Message + Send + 'static,
{
    fn kind(&self) -> CallKind {
        self.kind
    }

    fn spawn_call(&self, call: PendingCall) -> JoinHandle<()> {
        let handler = Arc::clone(&self.handler);
        let kind = self.kind;

        tokio::spawn(async move {
            let PendingCall {
                path,
                transport,
                ctx,
                guard,
                interceptors,
            } = call;
            // Keep the call registered for the duration of the task
            let _guard = guard;

            let mut session = match ServerSession::<Req, Resp>::accept(transport, ctx, kind).await {
                Ok(session) => session,
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "Failed to accept call");
                    return;
                }
            };
            let call_id = session.id();

            let mut info = CallInfo::new(call_id, path.clone(), kind, session.request_metadata());
            let verdict = interceptors
                .iter()
                .try_for_each(|interceptor| interceptor(&mut info));
            session.seed_metadata(info.header, info.trailer);
            if let Err(status) = verdict {
                tracing::debug!(
                    call_id = %call_id,
                    path = %path,
                    code = ?status.code(),
                    "Call rejected by interceptor"
                );
                if let Err(err) = session.close_with_status(status).await {
                    tracing::debug!(call_id = %call_id, error = %err, "Failed to reject call");
                }
                return;
            }

            let finisher = session.finisher();
            let outcome = AssertUnwindSafe(async move { handler(session).await })
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(call_id = %call_id, path = %path, "Handler panicked");
                    Err(Status::internal("handler panicked"))
                }
            };

            if let Err(status) = &result {
                tracing::debug!(
                    call_id = %call_id,
                    path = %path,
                    code = ?status.code(),
                    message = %status.message(),
                    "Handler returned an error status"
                );
            }
            if let Err(err) = finisher.finish(result).await {
                tracing::debug!(call_id = %call_id, error = %err, "Failed to close call");
            }

            tracing::debug!(call_id = %call_id, path = %path, "Call completed");
        })
    }
}

/// Helper to create a boxed handler from an async closure.
///
/// This handles the type gymnastics of boxing the closure and its return type.
pub fn make_handler<Req, Resp, F, Fut>(f: F) -> HandlerFn<Req, Resp>
where
    F: Fn(ServerSession<Req, Resp>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    Arc::new(
        move |session: ServerSession<Req, Resp>| -> BoxFuture<'static, Result<(), Status>> {
            Box::pin(f(session))
        },
    )
}
