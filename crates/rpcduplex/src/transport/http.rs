//! Server side of gRPC over HTTP/2.
//!
//! One HTTP exchange carries one call: request headers become the client's
//! header frame, the request body is split into length-prefixed messages, and
//! the end of the body is the client's half-close. On the way back the first
//! header frame resolves the response head, data frames are streamed as
//! length-prefixed body chunks, and the end frame becomes the HTTP trailers.
//! A call that ends before any header was sent is answered trailers-only.
use std::convert::Infallible;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::StreamExt;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, StreamBody};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::Code;
use tonic::body::Body;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::metadata::Metadata;
use crate::transport::{EndOfStream, Frame, FrameSink, FrameSource, Transport};

pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

const PREFIX_LEN: usize = 5;

/// Request headers that describe the HTTP exchange rather than the call.
/// Every `grpc-` header is reserved as well.
const RESERVED_HEADERS: &[&str] = &[
    "content-type",
    "te",
    "host",
    "connection",
    "content-length",
];

fn is_reserved(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.starts_with("grpc-") || RESERVED_HEADERS.contains(&name)
}

/// An accepted HTTP exchange, split into a transport for the call and the
/// pending HTTP response.
pub struct HttpCall {
    /// The request path, e.g. `/poem.PoemService/GetPoem`.
    pub path: String,
    pub transport: Transport,
    pub response: PendingResponse,
}

impl HttpCall {
    pub fn accept(request: Request<Body>, max_message_size: usize) -> Self {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(16);

        let source = HttpSource {
            header: Some(request_metadata(&parts.headers)),
            body,
            buf: BytesMut::new(),
            ended: false,
            max_message_size,
        };
        let sink = HttpSink {
            head: Some(head_tx),
            body: Some(body_tx),
            max_message_size,
        };

        trace!(%path, "Accepted gRPC exchange");
        Self {
            path,
            transport: Transport::new(sink, source),
            response: PendingResponse {
                head: head_rx,
                body: body_rx,
            },
        }
    }
}

fn request_metadata(headers: &HeaderMap) -> Metadata {
    headers
        .iter()
        .filter(|(name, _)| !is_reserved(name))
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str(), value.to_string()))
        })
        .collect()
}

fn metadata_headers(md: &Metadata) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    for (key, values) in md.iter() {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| TransportError::InvalidMetadata(format!("bad key '{key}'")))?;
        for value in values {
            let value = HeaderValue::from_str(value).map_err(|_| {
                TransportError::InvalidMetadata(format!("bad value for key '{key}'"))
            })?;
            headers.append(name.clone(), value);
        }
    }
    Ok(headers)
}

/// Percent-encode a status message the way gRPC expects in `grpc-message`.
fn encode_grpc_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for byte in message.bytes() {
        if (0x20..=0x7e).contains(&byte) && byte != b'%' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn status_headers(end: &EndOfStream) -> Result<HeaderMap, TransportError> {
    let mut headers = metadata_headers(&end.trailer)?;
    headers.insert("grpc-status", HeaderValue::from(end.code as i32));
    if !end.message.is_empty() {
        let message = HeaderValue::from_str(&encode_grpc_message(&end.message))
            .map_err(|_| TransportError::InvalidMetadata("bad status message".to_string()))?;
        headers.insert("grpc-message", message);
    }
    Ok(headers)
}

struct HttpSource {
    header: Option<Metadata>,
    body: Body,
    buf: BytesMut,
    ended: bool,
    max_message_size: usize,
}

impl HttpSource {
    fn decode_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        if self.buf.len() < PREFIX_LEN {
            return Ok(None);
        }
        if self.buf[0] != 0 {
            return Err(TransportError::Malformed(
                "compressed messages are not supported".to_string(),
            ));
        }
        let mut len_bytes = &self.buf[1..PREFIX_LEN];
        let len = len_bytes.get_u32() as usize;
        if len > self.max_message_size {
            return Err(TransportError::TooLarge {
                len,
                limit: self.max_message_size,
            });
        }
        if self.buf.len() < PREFIX_LEN + len {
            return Ok(None);
        }

        self.buf.advance(PREFIX_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

#[tonic::async_trait]
impl FrameSource for HttpSource {
    async fn recv_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        if let Some(header) = self.header.take() {
            return Ok(Some(Frame::Header(header)));
        }
        if self.ended {
            return Ok(None);
        }

        loop {
            if let Some(msg) = self.decode_message()? {
                return Ok(Some(Frame::Data(msg)));
            }

            match self.body.frame().await {
                Some(Ok(frame)) => {
                    // Request trailers carry nothing a call needs.
                    if let Ok(data) = frame.into_data() {
                        self.buf.extend_from_slice(&data);
                    }
                }
                Some(Err(status)) => {
                    return Err(TransportError::Io(status.message().to_string()));
                }
                None => {
                    if !self.buf.is_empty() {
                        return Err(TransportError::Malformed(format!(
                            "request body ended inside a message ({} bytes left)",
                            self.buf.len()
                        )));
                    }
                    self.ended = true;
                    return Ok(Some(Frame::End(EndOfStream::default())));
                }
            }
        }
    }
}

enum ResponseHead {
    Headers(HeaderMap),
    TrailersOnly(HeaderMap),
}

struct HttpSink {
    head: Option<oneshot::Sender<ResponseHead>>,
    body: Option<mpsc::Sender<http_body::Frame<Bytes>>>,
    max_message_size: usize,
}

#[tonic::async_trait]
impl FrameSink for HttpSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        match frame {
            Frame::Header(md) => {
                let headers = metadata_headers(&md)?;
                let head = self
                    .head
                    .take()
                    .ok_or_else(|| TransportError::Malformed("header already sent".to_string()))?;
                head.send(ResponseHead::Headers(headers))
                    .map_err(|_| TransportError::Closed)
            }
            Frame::Data(data) => {
                if self.head.is_some() {
                    return Err(TransportError::Malformed(
                        "data frame before header".to_string(),
                    ));
                }
                if data.len() > self.max_message_size {
                    return Err(TransportError::TooLarge {
                        len: data.len(),
                        limit: self.max_message_size,
                    });
                }
                let body = self.body.as_ref().ok_or(TransportError::Closed)?;

                let mut buf = BytesMut::with_capacity(PREFIX_LEN + data.len());
                buf.put_u8(0);
                buf.put_u32(data.len() as u32);
                buf.extend_from_slice(&data);
                body.send(http_body::Frame::data(buf.freeze()))
                    .await
                    .map_err(|_| TransportError::Closed)
            }
            Frame::End(end) => {
                let trailers = status_headers(&end)?;
                if let Some(head) = self.head.take() {
                    self.body = None;
                    return head
                        .send(ResponseHead::TrailersOnly(trailers))
                        .map_err(|_| TransportError::Closed);
                }
                let body = self.body.take().ok_or(TransportError::Closed)?;
                body.send(http_body::Frame::trailers(trailers))
                    .await
                    .map_err(|_| TransportError::Closed)
            }
        }
    }
}

/// The HTTP response of a call, available once the call sends its header or
/// ends.
pub struct PendingResponse {
    head: oneshot::Receiver<ResponseHead>,
    body: mpsc::Receiver<http_body::Frame<Bytes>>,
}

impl PendingResponse {
    pub async fn into_response(self) -> Response<Body> {
        match self.head.await {
            Ok(ResponseHead::Headers(headers)) => {
                let frames = ReceiverStream::new(self.body).map(Ok::<_, Infallible>);
                grpc_response(headers, Body::new(StreamBody::new(frames)))
            }
            Ok(ResponseHead::TrailersOnly(headers)) => grpc_response(headers, Body::empty()),
            Err(_) => {
                debug!("Call dropped before responding");
                trailers_only(Code::Internal, "call ended without a response")
            }
        }
    }
}

fn grpc_response(mut headers: HeaderMap, body: Body) -> Response<Body> {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    response
}

/// A complete trailers-only response carrying `code` and `message`.
pub fn trailers_only(code: Code, message: &str) -> Response<Body> {
    let end = EndOfStream::with_status(Metadata::new(), code, message);
    let headers = status_headers(&end).unwrap_or_else(|_| {
        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", HeaderValue::from(code as i32));
        headers
    });
    grpc_response(headers, Body::empty())
}
