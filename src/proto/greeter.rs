use serde::{Deserialize, Serialize};

/// The greeter lives outside any package, so its methods are
/// `/Greeter/{method}`.
pub const SERVICE: &str = "Greeter";

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloReply {
    #[prost(string, tag = "1")]
    pub message: String,
}
