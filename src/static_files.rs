use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use rpcduplex::Handler;
use rpcduplex::mux::{not_found, plain_response};
use tonic::body::Body;
use tracing::{debug, warn};

/// Serves files below a root directory for `GET` and `HEAD`.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: Arc<PathBuf>,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request path onto the root. `None` for paths that would leave it.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let mut resolved = self.root.to_path_buf();
        for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            if segment == ".." || segment.contains('\\') {
                return None;
            }
            resolved.push(segment);
        }
        Some(resolved)
    }

    pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
        let method = request.method().clone();
        if method != Method::GET && method != Method::HEAD {
            let mut response = plain_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let Some(mut path) = self.resolve(request.uri().path()) else {
            debug!(path = %request.uri().path(), "Rejected path outside the static root");
            return not_found();
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => path.push("index.html"),
            Ok(_) => {}
            Err(_) => return not_found(),
        }

        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to read static file");
                }
                return not_found();
            }
        };

        let len = contents.len();
        let body = if method == Method::HEAD {
            Body::empty()
        } else {
            Body::new(Full::new(Bytes::from(contents)))
        };

        let mut response = Response::new(body);
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        response
    }
}

impl Handler for StaticFiles {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, Response<Body>> {
        let files = self.clone();
        Box::pin(async move { files.serve(request).await })
    }
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("yaml") | Some("yml") => "application/yaml",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
