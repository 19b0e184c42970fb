//! Server configuration.
//!
//! Every field has a default; [`ServerConfig::from_env`] overrides them from
//! `SAMEPORT_*` environment variables.
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use rpcduplex::RpcServerConfig;

/// Configuration for the same-port server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address HTTP/1.1, h2c and gRPC are all served on.
    pub addr: SocketAddr,

    /// Directory served for requests nothing else claims.
    pub static_root: PathBuf,

    /// Path prefix of the JSON gateway (e.g. "/api").
    pub gateway_prefix: String,

    /// JSON array of users loaded at startup.
    pub users_file: Option<PathBuf>,

    /// JSON array of poems loaded at startup.
    pub poems_file: Option<PathBuf>,

    /// Reject RPC calls without `token` metadata.
    pub require_token: bool,

    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,

    pub rpc: RpcServerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            static_root: PathBuf::from("static"),
            gateway_prefix: "/api".to_string(),
            users_file: None,
            poems_file: None,
            require_token: false,
            log_level: "info".to_string(),
            rpc: RpcServerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `SAMEPORT_*` name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("SAMEPORT_ADDR") {
            config.addr = addr
                .parse()
                .with_context(|| format!("invalid SAMEPORT_ADDR: {addr}"))?;
        }
        if let Some(root) = lookup("SAMEPORT_STATIC_ROOT") {
            config.static_root = PathBuf::from(root);
        }
        if let Some(prefix) = lookup("SAMEPORT_GATEWAY_PREFIX") {
            config = config.with_gateway_prefix(prefix);
        }
        config.users_file = lookup("SAMEPORT_USERS_FILE").map(PathBuf::from);
        config.poems_file = lookup("SAMEPORT_POEMS_FILE").map(PathBuf::from);
        if let Some(flag) = lookup("SAMEPORT_REQUIRE_TOKEN") {
            config.require_token = parse_bool(&flag).context("invalid SAMEPORT_REQUIRE_TOKEN")?;
        }
        if let Some(level) = lookup("SAMEPORT_LOG") {
            config.log_level = level;
        }
        if let Some(size) = lookup("SAMEPORT_MAX_MESSAGE_SIZE") {
            let size = size
                .parse()
                .with_context(|| format!("invalid SAMEPORT_MAX_MESSAGE_SIZE: {size}"))?;
            config.rpc = config.rpc.with_max_message_size(size);
        }

        Ok(config)
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_static_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.static_root = root.into();
        self
    }

    /// Set the gateway prefix, normalised to one leading and no trailing
    /// slash.
    pub fn with_gateway_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.gateway_prefix = format!("/{}", prefix.as_ref().trim_matches('/'));
        self
    }

    pub fn with_users_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.users_file = Some(path.into());
        self
    }

    pub fn with_poems_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.poems_file = Some(path.into());
        self
    }

    pub fn with_require_token(mut self, require: bool) -> Self {
        self.require_token = require;
        self
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}
