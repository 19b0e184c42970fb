//! HTTP/1.1, JSON and gRPC served on one port.
//!
//! Requests are classified by a [`rpcduplex::RequestMultiplexer`]: gRPC
//! (HTTP/2 with a gRPC content type) goes to the RPC server, paths under the
//! gateway prefix go to the JSON gateway, and everything else to the static
//! file server.
pub mod app;
pub mod clients;
pub mod config;
pub mod gateway;
pub mod proto;
pub mod serve;
pub mod services;
pub mod static_files;
pub mod store;

pub use app::{App, build_multiplexer};
pub use config::ServerConfig;
pub use serve::serve;
