//! The per-call stream session.
//!
//! A [`StreamSession`] owns one call's transport and enforces the ordering of
//! header, data and trailer frames on both the client and the server side of
//! all four call kinds.
//!
//! # Ordering rules
//!
//! - A header always precedes the first data frame of a direction. Servers
//!   queue it with [`StreamSession::set_header`] and it is flushed by
//!   [`StreamSession::send_header`] or implicitly by the first
//!   [`StreamSession::send`]. Setting a header after it was flushed is ignored.
//! - A trailer is only sent with the server's close, and only observed by the
//!   client after end-of-stream. [`StreamSession::trailer`] never blocks.
//!
//! # Header deadlock hazard
//!
//! [`StreamSession::header`] waits for the peer's header or its end of stream.
//! A client that calls it before sending anything will wait forever on a
//! server that only flushes its header after receiving a message, while that
//! server waits for the client. Neither side can detect this; the call's
//! [`CallContext`] must be cancelled to break it, which makes every blocked
//! operation return [`SessionError::Cancelled`].
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::watch;
use tonic::Status;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{SessionError, TransportError};
use crate::metadata::Metadata;
use crate::transport::{BoxFrameSink, BoxFrameSource, EndOfStream, Frame, Transport};

/// How long a server waits to deliver the status of a call that already
/// failed before giving up on the peer.
const FINAL_STATUS_TIMEOUT: Duration = Duration::from_secs(1);

/// Opaque identifier of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity and cancellation signal of one call.
#[derive(Debug, Clone)]
pub struct CallContext {
    id: CallId,
    cancel: watch::Receiver<bool>,
}

/// Cancels the [`CallContext`] it was created with.
///
/// Dropping the handle does not cancel the call.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CallContext {
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            id: CallId::new(),
            cancel: rx,
        };
        (ctx, CancelHandle { tx: Arc::new(tx) })
    }

    /// A context nobody can cancel.
    pub fn background() -> Self {
        Self::new().0
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the call is cancelled. Never resolves if the handle was
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        let handle_gone = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if handle_gone {
            std::future::pending::<()>().await;
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Which side of the call a session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Direction capability of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidirectional,
}

impl CallKind {
    /// Whether the client may send more than one message.
    pub fn client_streams(self) -> bool {
        matches!(self, CallKind::ClientStreaming | CallKind::Bidirectional)
    }

    /// Whether the server may send more than one message.
    pub fn server_streams(self) -> bool {
        matches!(self, CallKind::ServerStreaming | CallKind::Bidirectional)
    }
}

/// State of one direction of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    HeaderPending,
    Streaming,
    HalfClosed,
    Closed,
    Errored,
}

struct Shared {
    ctx: CallContext,
    kind: CallKind,
    role: Role,
    error: Mutex<Option<SessionError>>,
    failed: watch::Sender<bool>,
    trailer: Mutex<Option<Metadata>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn new(ctx: CallContext, kind: CallKind, role: Role) -> Self {
        Self {
            ctx,
            kind,
            role,
            error: Mutex::new(None),
            failed: watch::channel(false).0,
            trailer: Mutex::new(None),
        }
    }

    fn error(&self) -> Option<SessionError> {
        lock(&self.error).clone()
    }

    /// Record `err` unless an earlier error is already recorded, wake every
    /// operation blocked on the other half, and return the recorded error.
    fn fail(&self, err: SessionError) -> SessionError {
        let recorded = {
            let mut slot = lock(&self.error);
            match &*slot {
                Some(first) => first.clone(),
                None => {
                    debug!(call_id = %self.ctx.id(), error = %err, "Session failed");
                    *slot = Some(err.clone());
                    err
                }
            }
        };
        self.failed.send_replace(true);
        recorded
    }

    async fn failed(&self) {
        let mut rx = self.failed.subscribe();
        let _ = rx.wait_for(|failed| *failed).await;
    }

    /// Run one transport operation as a suspension point that observes
    /// cancellation and failures recorded by the other half. Transport errors
    /// are returned unrecorded; the caller decides whether they end the call.
    async fn guard<T, F>(&self, op: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        if let Some(err) = self.error() {
            return Err(err);
        }
        if self.ctx.is_cancelled() {
            return Err(self.fail(SessionError::Cancelled));
        }

        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(self.fail(SessionError::Cancelled)),
            _ = self.failed() => Err(self.error().unwrap_or(SessionError::Cancelled)),
            result = op => result.map_err(SessionError::from),
        }
    }

    fn local_streams(&self) -> bool {
        match self.role {
            Role::Client => self.kind.client_streams(),
            Role::Server => self.kind.server_streams(),
        }
    }

    fn peer_streams(&self) -> bool {
        match self.role {
            Role::Client => self.kind.server_streams(),
            Role::Server => self.kind.client_streams(),
        }
    }

    fn require_server(&self, op: &str) -> Result<(), SessionError> {
        match self.role {
            Role::Server => Ok(()),
            Role::Client => Err(SessionError::violation(format!(
                "{op} is only available on the server side"
            ))),
        }
    }

    fn trailer(&self) -> Metadata {
        lock(&self.trailer).clone().unwrap_or_default()
    }
}

struct SendMeta {
    state: StreamState,
    error: Option<SessionError>,
    header: Option<Metadata>,
    header_flushed: bool,
    trailer: Metadata,
    sent: usize,
    /// Added by interceptors before the handler ran; the handler's own
    /// header and trailer are appended to these.
    base_header: Metadata,
    base_trailer: Metadata,
}

impl SendMeta {
    fn has_pending_header(&self) -> bool {
        !self.header_flushed && (self.header.is_some() || !self.base_header.is_empty())
    }

    fn take_header(&mut self) -> Metadata {
        let mut header = std::mem::take(&mut self.base_header);
        header.merge_append(self.header.take().unwrap_or_default());
        header
    }

    fn take_trailer(&mut self) -> Metadata {
        let mut trailer = std::mem::take(&mut self.base_trailer);
        trailer.merge_append(std::mem::take(&mut self.trailer));
        trailer
    }
}

/// Send side of a session. Shared between the public sender and the
/// [`Finisher`] so a call can be closed after its handler returned.
struct SendCore {
    shared: Arc<Shared>,
    sink: tokio::sync::Mutex<BoxFrameSink>,
    meta: Mutex<SendMeta>,
}

impl SendCore {
    fn state(&self) -> StreamState {
        lock(&self.meta).state
    }

    /// Move the send side to `Errored`. A peer that went away only ends the
    /// sending half, so the receiving half can still deliver the final status
    /// the peer sent before leaving. Every other error ends the whole call.
    fn errored(&self, err: SessionError) -> SessionError {
        let mut meta = lock(&self.meta);
        meta.state = StreamState::Errored;
        if err == SessionError::Transport(TransportError::Closed) {
            meta.error = Some(err.clone());
            return err;
        }
        drop(meta);
        self.shared.fail(err)
    }

    fn check_open(&self, meta: &SendMeta) -> Result<(), SessionError> {
        if let Some(err) = self.shared.error() {
            return Err(err);
        }
        if let Some(err) = &meta.error {
            return Err(err.clone());
        }
        match meta.state {
            StreamState::HalfClosed | StreamState::Closed => Err(SessionError::violation(
                "stream is already closed for sending",
            )),
            _ => Ok(()),
        }
    }

    fn set_header(&self, header: Metadata) -> Result<(), SessionError> {
        self.shared.require_server("set_header")?;
        let mut meta = lock(&self.meta);
        if meta.header_flushed {
            debug!(call_id = %self.shared.ctx.id(), "Ignoring header set after it was flushed");
            return Ok(());
        }
        meta.header = Some(header);
        Ok(())
    }

    fn set_trailer(&self, trailer: Metadata) -> Result<(), SessionError> {
        self.shared.require_server("set_trailer")?;
        let mut meta = lock(&self.meta);
        if matches!(meta.state, StreamState::HalfClosed | StreamState::Closed) {
            debug!(call_id = %self.shared.ctx.id(), "Ignoring trailer set after close");
            return Ok(());
        }
        meta.trailer = trailer;
        Ok(())
    }

    async fn flush_header(&self, sink: &mut BoxFrameSink) -> Result<(), SessionError> {
        let header = {
            let mut meta = lock(&self.meta);
            if meta.header_flushed {
                return Ok(());
            }
            self.check_open(&meta)?;
            let header = meta.take_header();
            meta.header_flushed = true;
            header
        };

        trace!(call_id = %self.shared.ctx.id(), header = %header, "Flushing header");
        self.shared
            .guard(sink.send_frame(Frame::Header(header)))
            .await
            .map_err(|err| self.errored(err))?;

        lock(&self.meta).state = StreamState::Streaming;
        Ok(())
    }

    async fn send_header(&self) -> Result<(), SessionError> {
        self.shared.require_server("send_header")?;
        let mut sink = self.sink.lock().await;
        self.flush_header(&mut sink).await
    }

    async fn send_data(&self, data: Bytes) -> Result<(), SessionError> {
        let mut sink = self.sink.lock().await;
        {
            let meta = lock(&self.meta);
            self.check_open(&meta)?;
            if !self.shared.local_streams() && meta.sent >= 1 {
                return Err(SessionError::violation(format!(
                    "{:?} call allows a single message in this direction",
                    self.shared.kind
                )));
            }
        }

        self.flush_header(&mut sink).await?;
        self.shared
            .guard(sink.send_frame(Frame::Data(data)))
            .await
            .map_err(|err| self.errored(err))?;

        lock(&self.meta).sent += 1;
        Ok(())
    }

    /// Close the send direction. Closing twice is a no-op.
    ///
    /// A server still delivers its final status after the receiving half
    /// failed. That failure becomes the status unless the handler supplied
    /// its own, and cancellation is always reported as `Cancelled`.
    async fn close(&self, status: Option<Status>) -> Result<(), SessionError> {
        let mut sink = self.sink.lock().await;
        let pending_header = {
            let meta = lock(&self.meta);
            if matches!(meta.state, StreamState::HalfClosed | StreamState::Closed) {
                return Ok(());
            }
            match self.shared.role {
                Role::Client => self.check_open(&meta)?,
                Role::Server => {
                    if let Some(err) = &meta.error {
                        return Err(err.clone());
                    }
                }
            }
            meta.has_pending_header()
        };

        let end = match self.shared.role {
            Role::Client => EndOfStream::default(),
            Role::Server => {
                if let Some(failure) = self.shared.error() {
                    return self.close_after_failure(&mut sink, failure, status).await;
                }
                if pending_header {
                    self.flush_header(&mut sink).await?;
                }
                let trailer = lock(&self.meta).take_trailer();
                end_of_stream(trailer, status)
            }
        };

        trace!(call_id = %self.shared.ctx.id(), code = ?end.code, "Closing send direction");
        self.shared
            .guard(sink.send_frame(Frame::End(end)))
            .await
            .map_err(|err| self.errored(err))?;

        let mut meta = lock(&self.meta);
        meta.state = StreamState::HalfClosed;
        meta.header_flushed = true;
        Ok(())
    }

    /// Write the final status of a call that already failed. The write
    /// bypasses [`Shared::guard`], which would refuse it, and is bounded by
    /// [`FINAL_STATUS_TIMEOUT`] instead. A header that was never flushed is
    /// dropped so the status travels alone.
    async fn close_after_failure(
        &self,
        sink: &mut BoxFrameSink,
        failure: SessionError,
        status: Option<Status>,
    ) -> Result<(), SessionError> {
        let status = match status {
            Some(status) if failure != SessionError::Cancelled => status,
            _ => Status::from(failure),
        };
        let trailer = {
            let mut meta = lock(&self.meta);
            meta.header_flushed = true;
            meta.header = None;
            meta.base_header = Metadata::new();
            meta.take_trailer()
        };
        let end = end_of_stream(trailer, Some(status));

        debug!(call_id = %self.shared.ctx.id(), code = ?end.code, "Sending status of failed call");
        let sent = tokio::time::timeout(FINAL_STATUS_TIMEOUT, sink.send_frame(Frame::End(end)))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Io(
                    "timed out writing final status".to_string(),
                ))
            });

        let mut meta = lock(&self.meta);
        match sent {
            Ok(()) => {
                meta.state = StreamState::HalfClosed;
                Ok(())
            }
            Err(err) => {
                let err = SessionError::from(err);
                meta.state = StreamState::Errored;
                meta.error = Some(err.clone());
                Err(err)
            }
        }
    }
}

fn end_of_stream(trailer: Metadata, status: Option<Status>) -> EndOfStream {
    match status {
        Some(status) => EndOfStream::with_status(trailer, status.code(), status.message()),
        None => EndOfStream::ok(trailer),
    }
}

/// Closes a server call with the outcome of its handler.
pub(crate) struct Finisher {
    core: Arc<SendCore>,
}

impl Finisher {
    /// No-op if the handler already closed the call itself.
    pub(crate) async fn finish(self, result: Result<(), Status>) -> Result<(), SessionError> {
        match result {
            Ok(()) => self.core.close(None).await,
            Err(status) => self.core.close(Some(status)).await,
        }
    }
}

/// The sending half of a session.
pub struct SessionSender<M> {
    core: Arc<SendCore>,
    _marker: PhantomData<fn(M)>,
}

impl<M> SessionSender<M> {
    pub fn id(&self) -> CallId {
        self.core.shared.ctx.id()
    }

    pub fn state(&self) -> StreamState {
        self.core.state()
    }

    /// Queue the outgoing header (server only). Later calls overwrite earlier
    /// ones until the header is flushed; after that they are ignored.
    pub fn set_header(&self, header: Metadata) -> Result<(), SessionError> {
        self.core.set_header(header)
    }

    /// Flush the queued header now (server only). No-op once flushed.
    pub async fn send_header(&mut self) -> Result<(), SessionError> {
        self.core.send_header().await
    }

    /// Queue the trailer sent with the close (server only). Ignored after close.
    pub fn set_trailer(&self, trailer: Metadata) -> Result<(), SessionError> {
        self.core.set_trailer(trailer)
    }

    /// Signal that no more messages follow. Servers close with an OK status
    /// and the queued trailer.
    pub async fn close_send(&mut self) -> Result<(), SessionError> {
        self.core.close(None).await
    }

    /// Close the call with a failure status (server only).
    pub async fn close_with_status(&mut self, status: Status) -> Result<(), SessionError> {
        self.core.shared.require_server("close_with_status")?;
        self.core.close(Some(status)).await
    }

    /// Record `err` as the session's failure, waking the receiving half.
    pub fn abort(&self, err: SessionError) -> SessionError {
        let err = self.core.shared.fail(err);
        lock(&self.core.meta).state = StreamState::Errored;
        err
    }
}

impl<M> SessionSender<M>
where
    M: prost::Message,
{
    /// Send one message, flushing the header first if needed.
    pub async fn send(&mut self, msg: &M) -> Result<(), SessionError> {
        let mut buf = Vec::with_capacity(msg.encoded_len());
        msg.encode(&mut buf)?;
        self.core.send_data(Bytes::from(buf)).await
    }
}

/// The receiving half of a session.
pub struct SessionReceiver<M> {
    shared: Arc<Shared>,
    source: BoxFrameSource,
    state: StreamState,
    header: Option<Metadata>,
    received: usize,
    _marker: PhantomData<fn() -> M>,
}

impl<M> SessionReceiver<M> {
    pub fn id(&self) -> CallId {
        self.shared.ctx.id()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Wait for the peer's header.
    ///
    /// Returns as soon as the header is known, or with empty metadata once the
    /// peer ended its stream cleanly without one. An end of stream carrying a
    /// failure status is returned as that error. See the module docs for the
    /// deadlock this can cause when the peer never flushes.
    pub async fn header(&mut self) -> Result<Metadata, SessionError> {
        if let Some(header) = &self.header {
            return Ok(header.clone());
        }
        if let Some(err) = self.shared.error() {
            return Err(err);
        }
        if self.state == StreamState::HalfClosed {
            return Ok(Metadata::new());
        }

        match self.next_frame().await? {
            Frame::Header(header) => {
                self.header = Some(header.clone());
                self.state = StreamState::Streaming;
                Ok(header)
            }
            Frame::End(end) => {
                self.observe_end(end)?;
                Ok(Metadata::new())
            }
            Frame::Data(_) => Err(self.fail(SessionError::violation(
                "data frame arrived before the header",
            ))),
        }
    }

    /// The peer's trailer, or empty metadata if its end of stream has not been
    /// observed yet. Never blocks.
    pub fn trailer(&self) -> Metadata {
        self.shared.trailer()
    }

    /// Record `err` as the session's failure, waking the sending half.
    pub fn abort(&mut self, err: SessionError) -> SessionError {
        self.fail(err)
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        self.state = StreamState::Errored;
        self.shared.fail(err)
    }

    async fn next_frame(&mut self) -> Result<Frame, SessionError> {
        match self.shared.guard(self.source.recv_frame()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(self.fail(TransportError::Closed.into())),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn observe_end(&mut self, end: EndOfStream) -> Result<(), SessionError> {
        *lock(&self.shared.trailer) = Some(end.trailer);
        self.state = StreamState::HalfClosed;
        if end.code == tonic::Code::Ok {
            Ok(())
        } else {
            Err(self.fail(SessionError::Status {
                code: end.code,
                message: end.message,
            }))
        }
    }
}

impl<M> SessionReceiver<M>
where
    M: prost::Message + Default,
{
    /// Wait for the next message. `Ok(None)` marks the peer's normal end of
    /// stream and is returned again on every later call.
    pub async fn recv(&mut self) -> Result<Option<M>, SessionError> {
        loop {
            if let Some(err) = self.shared.error() {
                return Err(err);
            }
            if self.state == StreamState::HalfClosed {
                return Ok(None);
            }

            match self.next_frame().await? {
                Frame::Header(header) => {
                    if self.header.is_some() {
                        return Err(self.fail(SessionError::violation("duplicate header frame")));
                    }
                    self.header = Some(header);
                    self.state = StreamState::Streaming;
                }
                Frame::Data(bytes) => {
                    if self.header.is_none() {
                        return Err(self.fail(SessionError::violation(
                            "data frame arrived before the header",
                        )));
                    }
                    self.received += 1;
                    if !self.shared.peer_streams() && self.received > 1 {
                        return Err(self.fail(SessionError::violation(format!(
                            "peer sent more than one message on a {:?} call",
                            self.shared.kind
                        ))));
                    }
                    return match M::decode(bytes) {
                        Ok(msg) => Ok(Some(msg)),
                        Err(err) => Err(self.fail(err.into())),
                    };
                }
                Frame::End(end) => {
                    self.observe_end(end)?;
                    return Ok(None);
                }
            }
        }
    }
}

impl<M> SessionReceiver<M>
where
    M: prost::Message + Default + Send + 'static,
{
    /// Adapt the receiver into a stream that ends after the peer's end of
    /// stream or the first error.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<M, SessionError>> + Send {
        async_stream::stream! {
            loop {
                match self.recv().await {
                    Ok(Some(msg)) => yield Ok(msg),
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        }
    }
}

/// One call as seen from one side: `Out` is what this side sends, `In` what
/// it receives.
pub struct StreamSession<Out, In> {
    sender: SessionSender<Out>,
    receiver: SessionReceiver<In>,
}

/// A client's view of a call with request `Req` and response `Resp`.
pub type ClientSession<Req, Resp> = StreamSession<Req, Resp>;

/// A server's view of a call with request `Req` and response `Resp`.
pub type ServerSession<Req, Resp> = StreamSession<Resp, Req>;

impl<Out, In> StreamSession<Out, In> {
    fn build(transport: Transport, ctx: CallContext, kind: CallKind, role: Role) -> Self {
        let shared = Arc::new(Shared::new(ctx, kind, role));
        let (send_state, recv_state) = match role {
            Role::Client => (StreamState::Idle, StreamState::HeaderPending),
            Role::Server => (StreamState::HeaderPending, StreamState::Idle),
        };

        let core = SendCore {
            shared: Arc::clone(&shared),
            sink: tokio::sync::Mutex::new(transport.sink),
            meta: Mutex::new(SendMeta {
                state: send_state,
                error: None,
                header: None,
                header_flushed: false,
                trailer: Metadata::new(),
                sent: 0,
                base_header: Metadata::new(),
                base_trailer: Metadata::new(),
            }),
        };

        Self {
            sender: SessionSender {
                core: Arc::new(core),
                _marker: PhantomData,
            },
            receiver: SessionReceiver {
                shared,
                source: transport.source,
                state: recv_state,
                header: None,
                received: 0,
                _marker: PhantomData,
            },
        }
    }

    /// Start a call as the client, sending `metadata` as the request header.
    pub async fn open(
        transport: Transport,
        ctx: CallContext,
        kind: CallKind,
        metadata: Metadata,
    ) -> Result<Self, SessionError> {
        let session = Self::build(transport, ctx, kind, Role::Client);
        {
            let core = &session.sender.core;
            lock(&core.meta).header = Some(metadata);
            let mut sink = core.sink.lock().await;
            match core.flush_header(&mut sink).await {
                // The server may answer and leave before reading anything;
                // its status is still there to be received.
                Ok(()) | Err(SessionError::Transport(TransportError::Closed)) => {}
                Err(err) => return Err(err),
            }
        }
        debug!(call_id = %session.id(), ?kind, "Opened client session");
        Ok(session)
    }

    /// Accept a call as the server by reading the client's request header.
    pub async fn accept(
        transport: Transport,
        ctx: CallContext,
        kind: CallKind,
    ) -> Result<Self, SessionError> {
        let mut session = Self::build(transport, ctx, kind, Role::Server);
        match session.receiver.next_frame().await? {
            Frame::Header(header) => {
                session.receiver.header = Some(header);
                session.receiver.state = StreamState::Streaming;
            }
            _ => {
                return Err(session.receiver.fail(SessionError::violation(
                    "call did not start with a request header",
                )));
            }
        }
        debug!(call_id = %session.id(), ?kind, "Accepted server session");
        Ok(session)
    }

    pub fn id(&self) -> CallId {
        self.receiver.shared.ctx.id()
    }

    pub fn context(&self) -> &CallContext {
        &self.receiver.shared.ctx
    }

    pub fn kind(&self) -> CallKind {
        self.receiver.shared.kind
    }

    pub fn role(&self) -> Role {
        self.receiver.shared.role
    }

    pub fn send_state(&self) -> StreamState {
        self.sender.state()
    }

    pub fn recv_state(&self) -> StreamState {
        self.receiver.state()
    }

    /// Combined state: `Errored` once any error is recorded, `Closed` once
    /// both directions are half-closed, otherwise the send state.
    pub fn state(&self) -> StreamState {
        if self.receiver.shared.error().is_some() {
            return StreamState::Errored;
        }
        match (self.send_state(), self.recv_state()) {
            (StreamState::HalfClosed, StreamState::HalfClosed) => StreamState::Closed,
            (send, _) => send,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state(), StreamState::Closed | StreamState::Errored)
    }

    /// The error that terminated the session, if any.
    pub fn error(&self) -> Option<SessionError> {
        self.receiver.shared.error()
    }

    /// The client's request metadata, as seen by the server.
    pub fn request_metadata(&self) -> Metadata {
        match self.role() {
            Role::Server => self.receiver.header.clone().unwrap_or_default(),
            Role::Client => Metadata::new(),
        }
    }

    pub fn set_header(&self, header: Metadata) -> Result<(), SessionError> {
        self.sender.set_header(header)
    }

    pub async fn send_header(&mut self) -> Result<(), SessionError> {
        self.sender.send_header().await
    }

    pub fn set_trailer(&self, trailer: Metadata) -> Result<(), SessionError> {
        self.sender.set_trailer(trailer)
    }

    pub async fn close_send(&mut self) -> Result<(), SessionError> {
        self.sender.close_send().await
    }

    pub async fn close_with_status(&mut self, status: Status) -> Result<(), SessionError> {
        self.sender.close_with_status(status).await
    }

    /// See [`SessionReceiver::header`].
    pub async fn header(&mut self) -> Result<Metadata, SessionError> {
        self.receiver.header().await
    }

    pub fn trailer(&self) -> Metadata {
        self.receiver.trailer()
    }

    /// Split into halves that can be driven from separate tasks.
    pub fn split(self) -> (SessionSender<Out>, SessionReceiver<In>) {
        (self.sender, self.receiver)
    }

    /// Metadata sent ahead of whatever the handler queues itself.
    pub(crate) fn seed_metadata(&self, header: Metadata, trailer: Metadata) {
        let mut meta = lock(&self.sender.core.meta);
        meta.base_header.merge_append(header);
        meta.base_trailer.merge_append(trailer);
    }

    pub(crate) fn finisher(&self) -> Finisher {
        Finisher {
            core: Arc::clone(&self.sender.core),
        }
    }
}

impl<Out, In> StreamSession<Out, In>
where
    Out: prost::Message,
{
    pub async fn send(&mut self, msg: &Out) -> Result<(), SessionError> {
        self.sender.send(msg).await
    }
}

impl<Out, In> StreamSession<Out, In>
where
    In: prost::Message + Default,
{
    pub async fn recv(&mut self) -> Result<Option<In>, SessionError> {
        self.receiver.recv().await
    }
}
