//! Protocol-sniffing request multiplexer.
//!
//! A [`RequestMultiplexer`] holds an ordered list of routes, each pairing a
//! [`Handler`] with an optional [`Predicate`]. Every request goes to the first
//! route whose predicate matches; a route without a predicate always matches.
//! When nothing matches the request is answered with `404 Not Found`.
//!
//! Predicates normally look at the request head only. A [`Predicate::Body`]
//! gets the buffered body as well; the body is then read once and handed on
//! to the chosen handler as an equivalent in-memory body. Buffering stops at
//! the multiplexer's body limit and the request is answered with
//! `413 Payload Too Large`.
use std::future::Future;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::request::Parts;
use http::{Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use tonic::body::Body;
use tracing::{debug, trace, warn};

/// Something that can answer a raw HTTP exchange.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, Response<Body>>;
}

struct FnHandler<F>(F);

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, Response<Body>> {
        Box::pin((self.0)(request))
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

type HeadFn = dyn Fn(&Parts) -> bool + Send + Sync;
type BodyFn = dyn Fn(&Parts, &Bytes) -> bool + Send + Sync;

/// Classification of a request.
#[derive(Clone)]
pub enum Predicate {
    /// Inspects side-effect-free request fields only.
    Head(Arc<HeadFn>),
    /// Also inspects the buffered request body.
    Body(Arc<BodyFn>),
}

impl Predicate {
    pub fn head(f: impl Fn(&Parts) -> bool + Send + Sync + 'static) -> Self {
        Predicate::Head(Arc::new(f))
    }

    pub fn body(f: impl Fn(&Parts, &Bytes) -> bool + Send + Sync + 'static) -> Self {
        Predicate::Body(Arc::new(f))
    }
}

#[derive(Clone)]
struct Route {
    handler: Arc<dyn Handler>,
    predicate: Option<Predicate>,
}

fn same_handler(a: &Arc<dyn Handler>, b: &Arc<dyn Handler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Largest request body a [`Predicate::Body`] gets to look at by default.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Routes each request to the first matching handler.
pub struct RequestMultiplexer {
    routes: RwLock<Vec<Route>>,
    body_limit: usize,
}

impl Default for RequestMultiplexer {
    fn default() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl RequestMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many body bytes may be buffered for body predicates.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Append a route. `None` matches every request.
    ///
    /// Routes added after a catch-all are never reached; this is logged but
    /// allowed.
    pub fn add(&self, handler: Arc<dyn Handler>, predicate: Option<Predicate>) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        if routes.iter().any(|route| route.predicate.is_none()) {
            warn!(
                position = routes.len(),
                "Route added after a catch-all route will never match"
            );
        }
        routes.push(Route { handler, predicate });
    }

    /// Builder form of [`RequestMultiplexer::add`] with a predicate.
    pub fn route(self, handler: Arc<dyn Handler>, predicate: Predicate) -> Self {
        self.add(handler, Some(predicate));
        self
    }

    /// Builder form of [`RequestMultiplexer::add`] without a predicate.
    pub fn fallback(self, handler: Arc<dyn Handler>) -> Self {
        self.add(handler, None);
        self
    }

    /// Remove every route that uses `handler` (compared by identity).
    /// Returns how many routes were removed.
    pub fn remove(&self, handler: &Arc<dyn Handler>) -> usize {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let before = routes.len();
        routes.retain(|route| !same_handler(&route.handler, handler));
        before - routes.len()
    }

    pub fn len(&self) -> usize {
        self.routes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `request` to the first matching route. Never fails: no match is
    /// answered with `404 Not Found`.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let routes = self
            .routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let (parts, body) = request.into_parts();
        let mut body = RequestBody::new(body);

        for (position, route) in routes.iter().enumerate() {
            let matched = match &route.predicate {
                None => true,
                Some(Predicate::Head(predicate)) => predicate(&parts),
                Some(Predicate::Body(predicate)) => match body.buffer(self.body_limit).await {
                    Ok(bytes) => predicate(&parts, bytes),
                    Err(err) if err.is::<LengthLimitError>() => {
                        debug!(limit = self.body_limit, "Request body over the buffering limit");
                        return plain_response(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            "request body too large\n",
                        );
                    }
                    Err(err) => {
                        debug!(error = %err, "Failed to buffer request body");
                        return plain_response(StatusCode::BAD_REQUEST, "invalid request body\n");
                    }
                },
            };

            if matched {
                trace!(position, path = %parts.uri.path(), "Dispatching request");
                let request = Request::from_parts(parts, body.into_body());
                return route.handler.handle(request).await;
            }
        }

        debug!(path = %parts.uri.path(), "No route matched");
        not_found()
    }
}

impl Handler for RequestMultiplexer {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, Response<Body>> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner()).clone();
        let snapshot = RequestMultiplexer {
            routes: RwLock::new(routes),
            body_limit: self.body_limit,
        };
        Box::pin(async move { snapshot.dispatch(request).await })
    }
}

/// The request body, buffered at most once.
struct RequestBody {
    streaming: Option<Body>,
    buffered: Option<Bytes>,
}

impl RequestBody {
    fn new(body: Body) -> Self {
        Self {
            streaming: Some(body),
            buffered: None,
        }
    }

    async fn buffer(
        &mut self,
        limit: usize,
    ) -> Result<&Bytes, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(body) = self.streaming.take() {
            self.buffered = Some(Limited::new(body, limit).collect().await?.to_bytes());
        }
        Ok(self.buffered.get_or_insert_with(Bytes::new))
    }

    fn into_body(self) -> Body {
        match (self.streaming, self.buffered) {
            (Some(body), _) => body,
            (None, Some(bytes)) => Body::new(Full::new(bytes)),
            (None, None) => Body::empty(),
        }
    }
}

/// A `text/plain` response with the given status.
pub fn plain_response(status: StatusCode, text: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::new(Full::new(Bytes::from_static(text.as_bytes()))));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn not_found() -> Response<Body> {
    plain_response(StatusCode::NOT_FOUND, "404 page not found\n")
}

/// Predicates for the usual classification of requests.
pub mod classify {
    use http::Version;
    use http::header::CONTENT_TYPE;
    use http::request::Parts;

    use super::Predicate;
    use crate::transport::http::GRPC_CONTENT_TYPE;

    /// HTTP/2 with a gRPC content type.
    pub fn is_grpc(parts: &Parts) -> bool {
        parts.version == Version::HTTP_2
            && parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.starts_with(GRPC_CONTENT_TYPE))
    }

    pub fn grpc() -> Predicate {
        Predicate::head(is_grpc)
    }

    /// Paths equal to `prefix` or below it (`/api`, `/api/...`).
    pub fn path_prefix(prefix: impl Into<String>) -> Predicate {
        let prefix = prefix.into();
        Predicate::head(move |parts| {
            let path = parts.uri.path();
            match path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
                None => false,
            }
        })
    }

    /// Requests whose content type starts with `content_type`.
    pub fn content_type(content_type: &'static str) -> Predicate {
        Predicate::head(move |parts| {
            parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.starts_with(content_type))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Version;

    fn tagged(tag: &'static str) -> Arc<dyn Handler> {
        handler_fn(move |_req| async move {
            let mut response = Response::new(Body::empty());
            response
                .headers_mut()
                .insert("x-handler", header::HeaderValue::from_static(tag));
            response
        })
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn handled_by(response: &Response<Body>) -> Option<&str> {
        response
            .headers()
            .get("x-handler")
            .and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let mux = RequestMultiplexer::new()
            .route(tagged("a"), Predicate::head(|_| true))
            .route(tagged("b"), Predicate::head(|_| true))
            .fallback(tagged("c"));

        let response = mux.dispatch(get("/")).await;
        assert_eq!(handled_by(&response), Some("a"));
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let mux = RequestMultiplexer::new().route(tagged("a"), Predicate::head(|_| false));

        let response = mux.dispatch(get("/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(handled_by(&response), None);
    }

    #[tokio::test]
    async fn test_remove_by_identity() {
        let shared = tagged("shared");
        let other = tagged("other");
        let mux = RequestMultiplexer::new();
        mux.add(shared.clone(), Some(Predicate::head(|_| true)));
        mux.add(other.clone(), None);
        mux.add(shared.clone(), None);

        assert_eq!(mux.remove(&shared), 2);
        assert_eq!(mux.len(), 1);
        assert_eq!(mux.remove(&shared), 0);

        let response = mux.dispatch(get("/")).await;
        assert_eq!(handled_by(&response), Some("other"));
    }

    #[tokio::test]
    async fn test_body_predicate_leaves_body_readable() {
        let echo = handler_fn(|req: Request<Body>| async move {
            let bytes = req.into_body().collect().await.unwrap().to_bytes();
            Response::new(Body::new(Full::new(bytes)))
        });
        let mux = RequestMultiplexer::new().route(
            echo,
            Predicate::body(|_, body| body.starts_with(b"{")),
        );

        let request = Request::builder()
            .uri("/")
            .body(Body::new(Full::new(Bytes::from_static(b"{\"a\":1}"))))
            .unwrap();
        let response = mux.dispatch(request).await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"{\"a\":1}"));
    }

    #[test]
    fn test_classify_grpc() {
        let (grpc, _) = Request::builder()
            .version(Version::HTTP_2)
            .header("content-type", "application/grpc+proto")
            .body(())
            .unwrap()
            .into_parts();
        assert!(classify::is_grpc(&grpc));

        let (http1, _) = Request::builder()
            .version(Version::HTTP_11)
            .header("content-type", "application/grpc")
            .body(())
            .unwrap()
            .into_parts();
        assert!(!classify::is_grpc(&http1));

        let (json, _) = Request::builder()
            .version(Version::HTTP_2)
            .header("content-type", "application/json")
            .body(())
            .unwrap()
            .into_parts();
        assert!(!classify::is_grpc(&json));
    }

    #[test]
    fn test_path_prefix() {
        let Predicate::Head(matches) = classify::path_prefix("/api") else {
            panic!("expected a head predicate");
        };
        let parts = |path: &str| Request::builder().uri(path).body(()).unwrap().into_parts().0;

        assert!(matches(&parts("/api")));
        assert!(matches(&parts("/api/users/1")));
        assert!(!matches(&parts("/apiary")));
        assert!(!matches(&parts("/index.html")));
    }
}
