#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, Version};
use http_body_util::{BodyExt, Full};
use rpcduplex::{LocalChannel, Metadata, RpcClientConfig};
use sameport::{App, ServerConfig};
use tonic::body::Body;

pub const DEADLINE: Duration = Duration::from_secs(5);

pub fn config() -> ServerConfig {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    ServerConfig::default()
        .with_static_root(root.join("static"))
        .with_users_file(root.join("testdata/users.json"))
        .with_poems_file(root.join("testdata/poems.json"))
}

pub fn app() -> App {
    App::from_config(&config()).unwrap()
}

pub fn app_with_token() -> App {
    App::from_config(&config().with_require_token(true)).unwrap()
}

pub fn channel(app: &App) -> LocalChannel {
    app.channel(RpcClientConfig::default())
}

pub fn md(pairs: &[(&str, &str)]) -> Metadata {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

pub fn http1(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .version(Version::HTTP_11);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::new(Full::new(Bytes::from(body.to_string()))))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&text(response).await).unwrap()
}
