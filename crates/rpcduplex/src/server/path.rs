use std::fmt;

use crate::error::RpcPathError;

/// A parsed gRPC method path: `/{package}.{service}/{method}`
///
/// Example: `/poem.PoemService/GetPoem`
/// - `package`: `poem`
/// - `service`: `PoemService`
/// - `method`: `GetPoem`
///
/// Services declared outside a package have an empty `package`, e.g.
/// `/Greeter/SayHello`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GrpcPath {
    pub package: String,
    pub service: String,
    pub method: String,
}

impl GrpcPath {
    /// Parse a gRPC path string. The leading `/` is optional.
    pub fn parse(path: &str) -> Result<Self, RpcPathError> {
        let path = path.strip_prefix('/').unwrap_or(path);

        let (service_path, method) = path
            .rsplit_once('/')
            .ok_or_else(|| RpcPathError::Invalid(format!("gRPC path must contain '/': '{path}'")))?;

        if service_path.contains('/') {
            return Err(RpcPathError::Invalid(format!(
                "service path must not contain '/': '{service_path}'"
            )));
        }
        let (package, service) = match service_path.rsplit_once('.') {
            Some((package, _)) if package.is_empty() => {
                return Err(RpcPathError::Invalid(format!(
                    "package must be non-empty when present: '{path}'"
                )));
            }
            Some(split) => split,
            None => ("", service_path),
        };

        if service.is_empty() || method.is_empty() {
            return Err(RpcPathError::Invalid(format!(
                "service and method must both be non-empty: '{path}'"
            )));
        }

        Ok(GrpcPath {
            package: package.to_owned(),
            service: service.to_owned(),
            method: method.to_owned(),
        })
    }

    /// Returns the full service name: `{package}.{service}`, or just the
    /// service without a package.
    pub fn full_service(&self) -> String {
        if self.package.is_empty() {
            self.service.clone()
        } else {
            format!("{}.{}", self.package, self.service)
        }
    }

    /// Returns the request path: `/{package}.{service}/{method}`
    pub fn full_path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GrpcPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.full_service(), self.method)
    }
}
