//! Clients that call an [`RpcServer`](crate::server::RpcServer) in process.
pub mod channel;
pub mod config;

pub use channel::{LocalChannel, UnaryResponse};
pub use config::{ClientCallInfo, ClientInterceptor, RpcClientConfig, log_calls};
