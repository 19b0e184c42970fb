#![allow(dead_code)]

use std::time::Duration;

use rpcduplex::Metadata;

pub const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Clone, PartialEq, prost::Message)]
pub struct Item {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Ack {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub ok: bool,
}

pub fn item(name: &str) -> Item {
    Item {
        name: name.to_string(),
    }
}

pub fn ack(name: &str) -> Ack {
    Ack {
        name: name.to_string(),
        ok: true,
    }
}

pub fn md(pairs: &[(&str, &str)]) -> Metadata {
    Metadata::try_from_pairs(pairs.iter().copied()).unwrap()
}
