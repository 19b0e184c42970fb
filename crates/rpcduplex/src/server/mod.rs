//! The RPC server: method registry, per-call tasks and call tracking.
pub mod calls;
pub mod config;
pub mod handler;
pub mod path;
pub mod router;

pub use calls::{ActiveCalls, CallGuard};
pub use config::RpcServerConfig;
pub use handler::{CallInfo, HandlerFn, Interceptor};
pub use path::GrpcPath;
pub use router::RpcServer;
