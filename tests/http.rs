mod common;

use bytes::{BufMut, Bytes, BytesMut};
use common::{DEADLINE, app, app_with_token, http1, json, text};
use http::{Request, StatusCode, Version};
use http_body_util::{BodyExt, Full};
use prost::Message as _;
use rpcduplex::Handler;
use sameport::proto::greeter::{HelloReply, HelloRequest};
use sameport::proto::user::{GetUserRequest, GetUserResponse};
use sameport::serve;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tonic::body::Body;

fn grpc_request(path: &str, msg: &impl prost::Message) -> Request<Body> {
    let payload = msg.encode_to_vec();
    let mut body = BytesMut::with_capacity(payload.len() + 5);
    body.put_u8(0);
    body.put_u32(payload.len() as u32);
    body.put_slice(&payload);

    Request::builder()
        .method("POST")
        .version(Version::HTTP_2)
        .uri(path)
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .body(Body::new(Full::new(body.freeze())))
        .unwrap()
}

#[tokio::test]
async fn test_gateway_user_crud() {
    let app = app();
    let mux = app.handler();

    let response = mux
        .handle(http1(
            "POST",
            "/api/users",
            Some(r#"{"name":"Dave","email":"dave@example.com"}"#),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let created = json(response).await;
    assert_eq!(created["user"]["id"], 4);
    assert_eq!(created["user"]["name"], "Dave");

    let response = mux
        .handle(http1(
            "PATCH",
            "/api/users/4",
            Some(r#"{"email":"david@example.com"}"#),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json(response).await;
    assert_eq!(updated["user"]["name"], "Dave");
    assert_eq!(updated["user"]["email"], "david@example.com");

    let fetched = json(mux.handle(http1("GET", "/api/users/4", None)).await).await;
    assert_eq!(fetched["user"]["email"], "david@example.com");

    let response = mux.handle(http1("DELETE", "/api/users/4", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.users.len(), 3);
}

#[tokio::test]
async fn test_gateway_create_mask_from_query() {
    let app = app();
    let response = app
        .handler()
        .handle(http1(
            "POST",
            "/api/users?create_mask=name",
            Some(r#"{"name":"Erin","email":"erin@example.com"}"#),
        ))
        .await;
    let created = json(response).await;
    assert_eq!(created["user"]["name"], "Erin");
    assert_eq!(created["user"]["email"], "");
}

#[tokio::test]
async fn test_gateway_lists_users_as_json_lines() {
    let app = app();
    let response = timeout(DEADLINE, app.handler().handle(http1("GET", "/api/users", None)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = timeout(DEADLINE, text(response)).await.unwrap();
    let names: Vec<String> = body
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["result"]["user"]["name"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(names, ["Alice", "Bob", "Carol"]);
}

#[tokio::test]
async fn test_gateway_errors_are_json() {
    let app = app();
    let mux = app.handler();

    let response = mux.handle(http1("GET", "/api/users/99", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await;
    assert_eq!(body["code"], tonic::Code::FailedPrecondition as i32);
    assert!(body["details"].as_array().unwrap().is_empty());

    let response = mux.handle(http1("POST", "/api/users", Some("{not json"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["code"], tonic::Code::InvalidArgument as i32);

    let response = mux.handle(http1("GET", "/api/nothing", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = mux.handle(http1("PUT", "/api/users", None)).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_gateway_forwards_token_metadata() {
    let app = app_with_token();
    let mux = app.handler();

    let response = mux.handle(http1("GET", "/api/users/1", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = http1("GET", "/api/users/1", None);
    request
        .headers_mut()
        .insert("grpc-metadata-token", "secret".parse().unwrap());
    let response = mux.handle(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["grpc-metadata-user"].len(), 4);
    assert_eq!(response.headers()["grpc-trailer-user"].len(), 4);
    assert_eq!(json(response).await["user"]["name"], "Alice");
}

#[tokio::test]
async fn test_grpc_and_gateway_share_paths() {
    let app = app();
    let response = timeout(
        DEADLINE,
        app.handler().handle(grpc_request(
            "/user.UserService/GetUser",
            &GetUserRequest { id: 2 },
        )),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/grpc");

    let collected = response.into_body().collect().await.unwrap();
    let trailers = collected.trailers().cloned().unwrap();
    assert_eq!(trailers["grpc-status"], "0");

    let bytes: Bytes = collected.to_bytes();
    let decoded = GetUserResponse::decode(&bytes[5..]).unwrap();
    assert_eq!(decoded.user.unwrap().name, "Bob");
}

#[tokio::test]
async fn test_greeter_answers_rest_and_grpc_on_one_path() {
    let app = app();
    let mux = app.handler();

    let response = mux
        .handle(http1("POST", "/Greeter/SayHello", Some(r#"{"name":"world"}"#)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["message"], "hello world");

    let response = mux
        .handle(http1("GET", "/Greeter/SayHello", None))
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = timeout(
        DEADLINE,
        mux.handle(grpc_request(
            "/Greeter/SayHelloAgain",
            &HelloRequest {
                name: "grpc".to_string(),
            },
        )),
    )
    .await
    .unwrap();
    assert_eq!(response.headers()["content-type"], "application/grpc");
    let collected = response.into_body().collect().await.unwrap();
    assert_eq!(collected.trailers().cloned().unwrap()["grpc-status"], "0");
    let bytes = collected.to_bytes();
    let reply = HelloReply::decode(&bytes[5..]).unwrap();
    assert_eq!(reply.message, "hello grpc again");
}

#[tokio::test]
async fn test_gateway_update_mask_query_is_decoded() {
    let app = app();
    let response = app
        .handler()
        .handle(http1(
            "PATCH",
            "/api/users/1?update_mask=name%2Cemail",
            Some(r#"{"name":"Alicia","email":"alicia@example.com"}"#),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json(response).await;
    assert_eq!(updated["user"]["name"], "Alicia");
    assert_eq!(updated["user"]["email"], "alicia@example.com");
}

#[tokio::test]
async fn test_static_files_are_the_fallback() {
    let app = app();
    let mux = app.handler();

    let response = mux.handle(http1("GET", "/", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert!(text(response).await.contains("<title>sameport</title>"));

    let response = mux.handle(http1("GET", "/missing.txt", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = mux.handle(http1("GET", "/../Cargo.toml", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = mux.handle(http1("POST", "/index.html", None)).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_serve_answers_http1_over_tcp() {
    let app = app();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, app.handler(), async move {
        let _ = stopped.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/users/1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    timeout(DEADLINE, stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let raw = String::from_utf8(raw).unwrap();
    assert!(raw.starts_with("HTTP/1.1 200"));
    assert!(raw.contains("Alice"));

    stop.send(()).unwrap();
    timeout(DEADLINE, server).await.unwrap().unwrap().unwrap();
}
