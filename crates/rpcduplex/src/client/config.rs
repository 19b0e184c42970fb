use std::fmt;
use std::sync::Arc;

use tonic::Status;

use crate::metadata::Metadata;
use crate::session::CallKind;

/// What a client interceptor sees before a call is opened.
#[derive(Debug, Clone)]
pub struct ClientCallInfo {
    pub path: String,
    pub kind: CallKind,
    /// Request metadata about to be sent. Interceptors may edit it.
    pub metadata: Metadata,
}

/// Runs before every call a client opens. An `Err` fails the call locally
/// with that status; the server never sees it.
pub type ClientInterceptor =
    Arc<dyn Fn(&mut ClientCallInfo) -> Result<(), Status> + Send + Sync + 'static>;

/// Configuration for in-process RPC clients.
#[derive(Clone)]
pub struct RpcClientConfig {
    /// Frames buffered per direction before a sender waits.
    pub channel_capacity: usize,

    /// Metadata attached to every call, before the per-call metadata.
    pub metadata: Metadata,

    /// Run in the order they were added.
    pub interceptors: Vec<ClientInterceptor>,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            metadata: Metadata::new(),
            interceptors: Vec::new(),
        }
    }
}

impl fmt::Debug for RpcClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClientConfig")
            .field("channel_capacity", &self.channel_capacity)
            .field("metadata", &self.metadata)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl RpcClientConfig {
    /// Set the per-direction channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the metadata attached to every call.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add an interceptor.
    pub fn with_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&mut ClientCallInfo) -> Result<(), Status> + Send + Sync + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }
}

/// An interceptor that logs every call it sees and lets it through.
pub fn log_calls(call: &mut ClientCallInfo) -> Result<(), Status> {
    tracing::info!(path = %call.path, kind = ?call.kind, metadata = %call.metadata, "Client call");
    Ok(())
}
