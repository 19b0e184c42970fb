//! Duplex streaming RPC sessions and a protocol-sniffing request multiplexer.
//!
//! - [`session`]: one call's lifecycle on either side, with header, data and
//!   trailer ordering enforced for unary, client-streaming, server-streaming
//!   and bidirectional calls.
//! - [`duplex`]: drives both directions of a bidirectional call as two tasks.
//! - [`transport`]: frame channels a session runs on (in-memory, HTTP/2 gRPC).
//! - [`server`] / [`client`]: a method registry serving sessions, and an
//!   in-process channel for calling it.
//! - [`mux`]: routes raw HTTP requests to the first matching handler.
pub mod client;
pub mod duplex;
pub mod error;
pub mod metadata;
pub mod mux;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{ClientCallInfo, LocalChannel, RpcClientConfig, UnaryResponse};
pub use duplex::{DuplexOutcome, drive};
pub use error::{MetadataError, RpcPathError, RpcServerError, SessionError, TransportError};
pub use metadata::Metadata;
pub use mux::{Handler, Predicate, RequestMultiplexer, handler_fn};
pub use server::{CallInfo, GrpcPath, RpcServer, RpcServerConfig};
pub use session::{
    CallContext, CallId, CallKind, CancelHandle, ClientSession, Role, ServerSession,
    SessionReceiver, SessionSender, StreamSession, StreamState,
};
pub use transport::{EndOfStream, Frame, Transport};
