use std::sync::Arc;

use anyhow::{Context, Result};
use rpcduplex::client::log_calls;
use rpcduplex::mux::classify;
use rpcduplex::{
    Handler, LocalChannel, RequestMultiplexer, RpcClientConfig, RpcServer, RpcServerError,
};
use tracing::info;

use crate::config::ServerConfig;
use crate::gateway::{JsonGateway, greeter_prefix};
use crate::services;
use crate::static_files::StaticFiles;
use crate::store::{PoemStore, UserStore};

/// Everything served on the shared port.
pub struct App {
    pub rpc: Arc<RpcServer>,
    pub gateway: Arc<JsonGateway>,
    pub files: Arc<StaticFiles>,
    pub users: Arc<UserStore>,
    pub poems: Arc<PoemStore>,
    pub multiplexer: Arc<RequestMultiplexer>,
}

impl App {
    /// Assemble the services around the given stores.
    pub fn new(
        config: &ServerConfig,
        users: Arc<UserStore>,
        poems: Arc<PoemStore>,
    ) -> Result<Self, RpcServerError> {
        let mut rpc = RpcServer::new(config.rpc.clone());
        services::register_all(&mut rpc, Arc::clone(&users), Arc::clone(&poems))?;
        if config.require_token {
            rpc.add_interceptor(services::require_token);
        }
        let rpc = Arc::new(rpc);

        let channel = LocalChannel::new(
            Arc::clone(&rpc),
            RpcClientConfig::default().with_interceptor(log_calls),
        );
        let gateway = Arc::new(JsonGateway::new(config.gateway_prefix.clone(), channel));
        let files = Arc::new(StaticFiles::new(config.static_root.clone()));

        let multiplexer = Arc::new(build_multiplexer(
            Arc::clone(&rpc) as Arc<dyn Handler>,
            Arc::clone(&gateway) as Arc<dyn Handler>,
            config.gateway_prefix.as_str(),
            Arc::clone(&files) as Arc<dyn Handler>,
        ));

        info!(
            methods = rpc.methods().len(),
            gateway_prefix = %config.gateway_prefix,
            static_root = %config.static_root.display(),
            "Assembled same-port application"
        );

        Ok(Self {
            rpc,
            gateway,
            files,
            users,
            poems,
            multiplexer,
        })
    }

    /// Load the configured fixtures and assemble the services.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let users = match &config.users_file {
            Some(path) => UserStore::load(path).context("failed to load users")?,
            None => UserStore::new(),
        };
        let poems = match &config.poems_file {
            Some(path) => PoemStore::load(path).context("failed to load poems")?,
            None => PoemStore::new(),
        };

        Ok(Self::new(config, Arc::new(users), Arc::new(poems))?)
    }

    /// An in-process channel to the RPC server.
    pub fn channel(&self, config: RpcClientConfig) -> LocalChannel {
        LocalChannel::new(Arc::clone(&self.rpc), config)
    }

    /// The handler for every request on the shared port.
    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.multiplexer) as Arc<dyn Handler>
    }
}

/// Route gRPC first, then the gateway prefix and the greeter paths, then
/// static files.
///
/// gRPC must be checked before the gateway because both may use the same
/// paths.
pub fn build_multiplexer(
    rpc: Arc<dyn Handler>,
    gateway: Arc<dyn Handler>,
    gateway_prefix: &str,
    files: Arc<dyn Handler>,
) -> RequestMultiplexer {
    RequestMultiplexer::new()
        .route(rpc, classify::grpc())
        .route(Arc::clone(&gateway), classify::path_prefix(gateway_prefix))
        .route(gateway, classify::path_prefix(greeter_prefix()))
        .fallback(files)
}
