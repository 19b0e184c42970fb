use futures::future::BoxFuture;
use http::{Request, Response};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tonic::Status;
use tonic::body::Body;
use tracing::{debug, info, warn};

use crate::error::RpcServerError;
use crate::metadata::Metadata;
use crate::mux::Handler;
use crate::server::calls::ActiveCalls;
use crate::server::config::RpcServerConfig;
use crate::server::handler::{
    CallInfo, ErasedHandler, Interceptor, PendingCall, TypedHandler, make_handler,
};
use crate::server::path::GrpcPath;
use crate::session::{CallContext, CallId, CallKind, ServerSession};
use crate::transport::http::HttpCall;
use crate::transport::{EndOfStream, Frame, Transport};

/// Registry of RPC methods that runs one stream session per call.
///
/// The server answers gRPC requests handed to it by a
/// [`RequestMultiplexer`](crate::mux::RequestMultiplexer) and in-process calls
/// made through a [`LocalChannel`](crate::client::LocalChannel).
pub struct RpcServer {
    handlers: HashMap<String, Arc<dyn ErasedHandler>>,
    interceptors: Arc<Vec<Interceptor>>,
    calls: Arc<ActiveCalls>,
    config: RpcServerConfig,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(config: RpcServerConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            interceptors: Arc::new(Vec::new()),
            calls: Arc::new(ActiveCalls::new()),
            config,
        }
    }

    /// Register a handler for a method path.
    ///
    /// # Example
    /// ```ignore
    /// server.register::<GetPoemRequest, Poem, _, _>(
    ///     "/poem.PoemService/GetPoem",
    ///     CallKind::Unary,
    ///     move |session| get_poem(store.clone(), session),
    /// )?;
    /// ```
    pub fn register<Req, Resp, F, Fut>(
        &mut self,
        path: &str,
        kind: CallKind,
        handler: F,
    ) -> Result<(), RpcServerError>
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        F: Fn(ServerSession<Req, Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let path = GrpcPath::parse(path)?.full_path();
        if self.handlers.contains_key(&path) {
            return Err(RpcServerError::DuplicateMethod(path));
        }

        let handler = TypedHandler::<Req, Resp>::new(kind, make_handler(handler));
        self.handlers.insert(path.clone(), Arc::new(handler));

        info!(path = %path, ?kind, "Registered RPC handler");
        Ok(())
    }

    /// Add an interceptor. Interceptors run in the order they were added and
    /// the first rejection stops the rest.
    pub fn add_interceptor<F>(&mut self, interceptor: F)
    where
        F: Fn(&mut CallInfo) -> Result<(), Status> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.interceptors).push(Arc::new(interceptor));
    }

    /// Builder form of [`RpcServer::add_interceptor`].
    pub fn with_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&mut CallInfo) -> Result<(), Status> + Send + Sync + 'static,
    {
        self.add_interceptor(interceptor);
        self
    }

    /// Start serving one call on `transport`.
    ///
    /// Calls to unknown methods are answered with `Unimplemented` without
    /// reading the request.
    pub fn serve_transport(&self, path: &str, transport: Transport) -> JoinHandle<()> {
        let handler = GrpcPath::parse(path)
            .ok()
            .and_then(|path| self.handlers.get(&path.full_path()));

        let Some(handler) = handler else {
            warn!(path = %path, "No handler registered for RPC path");
            let message = self.config.unimplemented_message.clone();
            let mut sink = transport.sink;
            return tokio::spawn(async move {
                let end = EndOfStream::with_status(
                    Metadata::new(),
                    tonic::Code::Unimplemented,
                    message,
                );
                if let Err(err) = sink.send_frame(Frame::End(end)).await {
                    debug!(error = %err, "Failed to reject unknown method");
                }
            });
        };

        let (ctx, cancel) = CallContext::new();
        let guard = self.calls.register(ctx.id(), path, cancel);
        debug!(call_id = %ctx.id(), path = %path, "Spawning handler for new call");

        handler.spawn_call(PendingCall {
            path: path.to_string(),
            transport,
            ctx,
            guard,
            interceptors: Arc::clone(&self.interceptors),
        })
    }

    /// Check if a handler is registered for the given path.
    pub fn has_handler(&self, path: &str) -> bool {
        self.kind_of(path).is_some()
    }

    /// The call kind registered for a path.
    pub fn kind_of(&self, path: &str) -> Option<CallKind> {
        let path = GrpcPath::parse(path).ok()?;
        self.handlers.get(&path.full_path()).map(|h| h.kind())
    }

    /// Registered method paths, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Get the number of running calls.
    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    /// The registry of running calls.
    pub fn calls(&self) -> &Arc<ActiveCalls> {
        &self.calls
    }

    /// Cancel one running call.
    pub fn cancel(&self, id: &CallId) -> bool {
        self.calls.cancel(id)
    }

    /// Cancel every running call.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.calls.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "Cancelled running calls");
        }
        cancelled
    }

    pub fn config(&self) -> &RpcServerConfig {
        &self.config
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new(RpcServerConfig::default())
    }
}

impl Handler for RpcServer {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, Response<Body>> {
        let HttpCall {
            path,
            transport,
            response,
        } = HttpCall::accept(request, self.config.max_message_size);

        self.serve_transport(&path, transport);
        Box::pin(response.into_response())
    }
}
