//! Message types of the User, Poem, Message and Greeter services.
//!
//! The structs carry `prost` derives directly; nothing is generated at build
//! time.
pub mod greeter;
pub mod message;
pub mod poem;
pub mod user;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Empty request or response.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Empty {}
