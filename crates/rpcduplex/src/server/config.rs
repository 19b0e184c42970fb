/// Configuration for the RPC server.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    /// Largest encoded message accepted or sent over HTTP, in bytes.
    pub max_message_size: usize,

    /// Status message sent to callers of unknown methods.
    pub unimplemented_message: String,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            max_message_size: 4 * 1024 * 1024,
            unimplemented_message: "unknown method".to_string(),
        }
    }
}

impl RpcServerConfig {
    /// Set the message size limit.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Set the status message for unknown methods.
    pub fn with_unimplemented_message(mut self, message: impl Into<String>) -> Self {
        self.unimplemented_message = message.into();
        self
    }
}
