//! Blocking HTTP/1.x adapter between an endpoint and an engine.
use http::{HeaderMap, HeaderValue, Response, StatusCode, Version};
use serde::Deserialize;

pub use self::core::{create_http_handler, HttpCoreHandler};

pub mod codec;
pub mod core;

pub const CLOSE: &str = "close";
pub const KEEPALIVE: &str = "Keep-Alive";
#[allow(clippy::declare_interior_mutable_const)]
pub const CLOSE_VALUE: HeaderValue = HeaderValue::from_static(CLOSE);
#[allow(clippy::declare_interior_mutable_const)]
pub const KEEPALIVE_VALUE: HeaderValue = HeaderValue::from_static(KEEPALIVE);

macro_rules! define_const {
    ($name: ident, $val: expr, $type: ty) => {
        const fn $name() -> $type {
            $val
        }
    };
}

define_const!(default_keepalive_requests, 1000, usize);
define_const!(default_max_header_bytes, 16 * 1024, usize);
define_const!(default_max_body_bytes, 1024 * 1024, usize);

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Requests served on one connection before it is closed.
    #[serde(default = "default_keepalive_requests")]
    pub keepalive_requests: usize,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Value of the `Server` header, omitted when unset.
    #[serde(default)]
    pub server: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            keepalive_requests: default_keepalive_requests(),
            max_header_bytes: default_max_header_bytes(),
            max_body_bytes: default_max_body_bytes(),
            server: None,
        }
    }
}

fn generate_response(status_code: StatusCode, close: bool) -> Response<bytes::Bytes> {
    let mut resp = Response::new(bytes::Bytes::new());
    *resp.status_mut() = status_code;
    if close {
        resp.headers_mut().insert(http::header::CONNECTION, CLOSE_VALUE);
    }
    resp
}

/// Whether the client asked to keep the connection open.
pub fn is_conn_keepalive(headers: &HeaderMap<HeaderValue>, version: Version) -> bool {
    match (version, headers.get(http::header::CONNECTION)) {
        (Version::HTTP_10, Some(header))
            if header.as_bytes().eq_ignore_ascii_case(KEEPALIVE.as_bytes()) =>
        {
            true
        }
        (Version::HTTP_11, None) => true,
        (Version::HTTP_11, Some(header))
            if !header.as_bytes().eq_ignore_ascii_case(CLOSE.as_bytes()) =>
        {
            true
        }
        _ => false,
    }
}
