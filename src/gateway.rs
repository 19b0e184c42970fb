//! JSON over HTTP translation of the user service.
//!
//! | Request                        | Call                        |
//! |--------------------------------|-----------------------------|
//! | `POST {prefix}/users`          | `CreateUser` (body: a user) |
//! | `GET {prefix}/users`           | `ListUsers` (NDJSON)        |
//! | `GET {prefix}/users/{id}`      | `GetUser`                   |
//! | `PATCH {prefix}/users/{id}`    | `UpdateUser` (body: a user) |
//! | `DELETE {prefix}/users/{id}`   | `DeleteUser`                |
//! | `POST /Greeter/SayHello`       | `SayHello` (body: request)  |
//! | `POST /Greeter/SayHelloAgain`  | `SayHelloAgain`             |
//!
//! `Grpc-Metadata-*` request headers become call metadata. The response
//! header and trailer metadata come back as `Grpc-Metadata-*` and
//! `Grpc-Trailer-*` headers. A create or update request without an explicit
//! mask (`?create_mask=` / `?update_mask=`) gets one listing the user fields
//! present in the body.
use std::convert::Infallible;

use bytes::Bytes;
use futures::StreamExt;
use futures::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use rpcduplex::{Handler, LocalChannel, Metadata, SessionError, UnaryResponse};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tonic::Code;
use tonic::body::Body;
use tracing::{debug, info};

use crate::proto::greeter::{self, HelloReply, HelloRequest};
use crate::proto::user::{
    CreateUserRequest, CreateUserResponse, DeleteUserRequest, DeleteUserResponse, FieldMask,
    GetUserRequest, GetUserResponse, ListUsersRequest, ListUsersResponse, SERVICE,
    USER_FIELDS, UpdateUserRequest, UpdateUserResponse, User,
};

const JSON: &str = "application/json";
const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";
const TRAILER_HEADER_PREFIX: &str = "grpc-trailer-";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("no route for {method} {path}")]
    NotFound { method: Method, path: String },

    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),

    /// The request content is malformed.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error(transparent)]
    Rpc(#[from] SessionError),
}

impl GatewayError {
    /// The status code reported in the JSON error body.
    pub fn code(&self) -> Code {
        match self {
            GatewayError::NotFound { .. } => Code::NotFound,
            GatewayError::MethodNotAllowed(_) => Code::Unimplemented,
            GatewayError::Validation(_) | GatewayError::Body(_) => Code::InvalidArgument,
            GatewayError::Rpc(err) => err.code(),
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Validation(_) | GatewayError::Body(_) => StatusCode::BAD_REQUEST,
            GatewayError::Rpc(err) => http_status(err.code()),
        }
    }

    fn message(&self) -> String {
        match self {
            GatewayError::Rpc(SessionError::Status { message, .. }) => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn into_response(self) -> Response<Body> {
        let body = json!({
            "code": self.code() as i32,
            "message": self.message(),
            "details": [],
        });
        json_response(self.http_status(), &body)
    }
}

/// HTTP status for an RPC status code.
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    CreateUser,
    ListUsers,
    GetUser(i64),
    UpdateUser(i64),
    DeleteUser(i64),
    Greet(&'static str),
}

/// Greeter methods reachable as `POST /Greeter/{method}`.
const GREETER_METHODS: &[&str] = &["SayHello", "SayHelloAgain"];

/// Path prefix of the greeter routes, which sit outside the gateway prefix.
pub fn greeter_prefix() -> String {
    format!("/{}/", greeter::SERVICE)
}

/// Translates JSON requests under a path prefix into user service calls.
#[derive(Clone)]
pub struct JsonGateway {
    prefix: String,
    channel: LocalChannel,
}

impl JsonGateway {
    pub fn new(prefix: impl Into<String>, channel: LocalChannel) -> Self {
        Self {
            prefix: prefix.into(),
            channel,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn route(&self, method: &Method, path: &str) -> Result<Route, GatewayError> {
        let not_found = || GatewayError::NotFound {
            method: method.clone(),
            path: path.to_string(),
        };

        if let Some(name) = path.strip_prefix(greeter_prefix().as_str()) {
            let method_name = GREETER_METHODS
                .iter()
                .find(|candidate| **candidate == name)
                .copied()
                .ok_or_else(not_found)?;
            return match *method {
                Method::POST => Ok(Route::Greet(method_name)),
                _ => Err(GatewayError::MethodNotAllowed(method.clone())),
            };
        }

        let rest = path.strip_prefix(self.prefix.as_str()).ok_or_else(not_found)?;
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["users"] => match *method {
                Method::POST => Ok(Route::CreateUser),
                Method::GET => Ok(Route::ListUsers),
                _ => Err(GatewayError::MethodNotAllowed(method.clone())),
            },
            ["users", id] => {
                let id = id
                    .parse()
                    .map_err(|_| GatewayError::Validation(format!("invalid user id {id:?}")))?;
                match *method {
                    Method::GET => Ok(Route::GetUser(id)),
                    Method::PATCH => Ok(Route::UpdateUser(id)),
                    Method::DELETE => Ok(Route::DeleteUser(id)),
                    _ => Err(GatewayError::MethodNotAllowed(method.clone())),
                }
            }
            _ => Err(not_found()),
        }
    }

    /// Answer one request; failures become JSON error responses.
    pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
        match self.try_serve(request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(error = %err, "Gateway request failed");
                err.into_response()
            }
        }
    }

    async fn try_serve(&self, request: Request<Body>) -> Result<Response<Body>, GatewayError> {
        let route = self.route(request.method(), request.uri().path())?;
        let metadata = incoming_metadata(request.headers());
        let query = request.uri().query().unwrap_or_default().to_string();
        info!(?route, "Gateway request");

        match route {
            Route::CreateUser => {
                let body = read_body(request).await?;
                let user: User = parse_json(&body)?;
                let create_mask = Some(mask_from(&query, "create_mask", &body)?);

                let request = CreateUserRequest {
                    user: Some(user),
                    create_mask,
                };
                let response: UnaryResponse<CreateUserResponse> =
                    self.unary("CreateUser", &request, metadata).await?;
                Ok(unary_response(response))
            }
            Route::GetUser(id) => {
                let response: UnaryResponse<GetUserResponse> = self
                    .unary("GetUser", &GetUserRequest { id }, metadata)
                    .await?;
                Ok(unary_response(response))
            }
            Route::UpdateUser(id) => {
                let body = read_body(request).await?;
                let user: User = parse_json(&body)?;
                let update_mask = Some(mask_from(&query, "update_mask", &body)?);

                let request = UpdateUserRequest {
                    user: Some(User { id, ..user }),
                    update_mask,
                };
                let response: UnaryResponse<UpdateUserResponse> =
                    self.unary("UpdateUser", &request, metadata).await?;
                Ok(unary_response(response))
            }
            Route::DeleteUser(id) => {
                let response: UnaryResponse<DeleteUserResponse> = self
                    .unary("DeleteUser", &DeleteUserRequest { id }, metadata)
                    .await?;
                Ok(unary_response(response))
            }
            Route::ListUsers => self.list_users(metadata).await,
            Route::Greet(name) => {
                let body = read_body(request).await?;
                let request: HelloRequest = parse_json(&body)?;
                let path = format!("/{}/{name}", greeter::SERVICE);
                let response: UnaryResponse<HelloReply> =
                    self.channel.unary(&path, &request, metadata).await?;
                Ok(unary_response(response))
            }
        }
    }

    async fn unary<Req, Resp>(
        &self,
        method: &str,
        request: &Req,
        metadata: Metadata,
    ) -> Result<UnaryResponse<Resp>, GatewayError>
    where
        Req: prost::Message + std::fmt::Debug,
        Resp: prost::Message + Default + std::fmt::Debug,
    {
        let path = format!("/{SERVICE}/{method}");
        Ok(self.channel.unary(&path, request, metadata).await?)
    }

    /// Stream every user as one `{"result": ...}` line. An error after the
    /// first line is reported as a final `{"error": ...}` line.
    async fn list_users(&self, metadata: Metadata) -> Result<Response<Body>, GatewayError> {
        let path = format!("/{SERVICE}/ListUsers");
        let mut session = self
            .channel
            .server_streaming::<ListUsersRequest, ListUsersResponse>(
                &path,
                &ListUsersRequest {},
                metadata,
            )
            .await?;

        // Waits for the first user or the end of the stream, so an early
        // failure still gets a proper error response.
        let header = session.header().await?;

        let lines = futures::stream::unfold(Some(session), |session| async move {
            let mut session = session?;
            match session.recv().await {
                Ok(Some(user)) => Some((json_line(&json!({ "result": user })), Some(session))),
                Ok(None) => None,
                Err(err) => {
                    let err = GatewayError::from(err);
                    let line = json!({
                        "error": { "code": err.code() as i32, "message": err.message() }
                    });
                    Some((json_line(&line), None))
                }
            }
        });
        let body = StreamBody::new(lines.map(|line| Ok::<_, Infallible>(Frame::data(line))));

        let mut response = Response::new(Body::new(body));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        insert_metadata(response.headers_mut(), METADATA_HEADER_PREFIX, &header);
        Ok(response)
    }
}

impl Handler for JsonGateway {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, Response<Body>> {
        let gateway = self.clone();
        Box::pin(async move { gateway.serve(request).await })
    }
}

async fn read_body(request: Request<Body>) -> Result<Bytes, GatewayError> {
    let collected = request
        .into_body()
        .collect()
        .await
        .map_err(|e| GatewayError::Body(e.to_string()))?;
    Ok(collected.to_bytes())
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::Validation(e.to_string()))
}

/// The mask named by `key` in the query string, or else the user fields
/// present in the JSON body.
fn mask_from(query: &str, key: &str, body: &[u8]) -> Result<FieldMask, GatewayError> {
    let explicit = url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == key)
        .map(|(_, value)| value);

    if let Some(value) = explicit {
        return Ok(FieldMask::new(
            value.split(',').filter(|field| !field.is_empty()),
        ));
    }
    body_field_mask(body)
}

/// The user fields set in a JSON object body, in body order.
pub fn body_field_mask(body: &[u8]) -> Result<FieldMask, GatewayError> {
    let value: serde_json::Value = parse_json(body)?;
    let object = value
        .as_object()
        .ok_or_else(|| GatewayError::Validation("request body must be a JSON object".into()))?;

    Ok(FieldMask::new(
        object
            .keys()
            .filter(|key| USER_FIELDS.contains(&key.as_str()))
            .map(String::as_str),
    ))
}

fn incoming_metadata(headers: &HeaderMap) -> Metadata {
    let mut metadata = Metadata::new();
    for (name, value) in headers {
        let Some(key) = name.as_str().strip_prefix(METADATA_HEADER_PREFIX) else {
            continue;
        };
        if let Ok(value) = value.to_str() {
            metadata.append(key, value);
        }
    }
    metadata
}

fn insert_metadata(headers: &mut HeaderMap, prefix: &str, metadata: &Metadata) {
    for (key, values) in metadata.iter() {
        let Ok(name) = HeaderName::from_bytes(format!("{prefix}{key}").as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
}

fn json_line(value: &serde_json::Value) -> Bytes {
    let mut line = value.to_string().into_bytes();
    line.push(b'\n');
    Bytes::from(line)
}

fn json_response(status: StatusCode, body: &impl Serialize) -> Response<Body> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(Body::new(Full::new(Bytes::from(bytes))));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    response
}

fn unary_response<M: Serialize>(response: UnaryResponse<M>) -> Response<Body> {
    let mut http = json_response(StatusCode::OK, &response.message);
    insert_metadata(http.headers_mut(), METADATA_HEADER_PREFIX, &response.header);
    insert_metadata(http.headers_mut(), TRAILER_HEADER_PREFIX, &response.trailer);
    http
}
