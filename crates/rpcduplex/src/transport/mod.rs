//! Frame transports that stream sessions run on.
//!
//! A session only needs an ordered duplex channel of [`Frame`]s. The wire
//! representation of those frames belongs to the transport:
//!
//! - [`memory`]: a bounded in-process channel pair, used for in-process calls
//!   and tests.
//! - [`http`]: the server side of gRPC over HTTP/2, where headers, body and
//!   trailers of one HTTP exchange carry the frames of one call.

pub mod http;
pub mod memory;

use bytes::Bytes;
use tonic::Code;

use crate::error::TransportError;
use crate::metadata::Metadata;

/// One unit of a call as seen by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Metadata sent before any data frame of this direction.
    Header(Metadata),
    /// One encoded message.
    Data(Bytes),
    /// The sender will produce nothing more in this direction.
    End(EndOfStream),
}

/// Terminal frame of one direction.
///
/// Clients half-close with an OK, empty end. Servers close with their trailer
/// and the final status of the call.
#[derive(Debug, Clone, PartialEq)]
pub struct EndOfStream {
    pub trailer: Metadata,
    pub code: Code,
    pub message: String,
}

impl EndOfStream {
    pub fn ok(trailer: Metadata) -> Self {
        Self {
            trailer,
            code: Code::Ok,
            message: String::new(),
        }
    }

    pub fn with_status(trailer: Metadata, code: Code, message: impl Into<String>) -> Self {
        Self {
            trailer,
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

impl Default for EndOfStream {
    fn default() -> Self {
        Self::ok(Metadata::new())
    }
}

/// The sending half of a transport.
#[tonic::async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;
}

/// The receiving half of a transport.
#[tonic::async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame. `Ok(None)` means the channel is gone; a
    /// well-behaved peer always sends [`Frame::End`] first.
    async fn recv_frame(&mut self) -> Result<Option<Frame>, TransportError>;
}

pub type BoxFrameSink = Box<dyn FrameSink>;
pub type BoxFrameSource = Box<dyn FrameSource>;

/// Both halves of one call's transport.
pub struct Transport {
    pub sink: BoxFrameSink,
    pub source: BoxFrameSource,
}

impl Transport {
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}
