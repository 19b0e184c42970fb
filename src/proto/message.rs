pub const SERVICE: &str = "message.MessageService";

#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    #[prost(string, tag = "1")]
    pub content: String,
}

impl Message {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageCollection {
    #[prost(message, repeated, tag = "1")]
    pub value: Vec<Message>,
}
