use std::net::SocketAddr;

use bytes::Bytes;
use http::{header, HeaderValue, Request, Response, StatusCode};

/// Names of the containers a request was routed through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingData {
    pub host: Option<String>,
    pub context: Option<String>,
    pub wrapper: Option<String>,
}

/// A request travelling through the container tree together with the
/// response being built for it.
#[derive(Debug)]
pub struct Exchange {
    request: Request<Bytes>,
    response: Response<Bytes>,
    mapping: MappingData,
    peer: Option<SocketAddr>,
}

impl Exchange {
    pub fn new(request: Request<Bytes>) -> Self {
        Self {
            request,
            response: Response::new(Bytes::new()),
            mapping: MappingData::default(),
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Bytes> {
        &mut self.request
    }

    pub fn response(&self) -> &Response<Bytes> {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response<Bytes> {
        &mut self.response
    }

    pub fn into_response(self) -> Response<Bytes> {
        self.response
    }

    pub fn mapping(&self) -> &MappingData {
        &self.mapping
    }

    pub fn mapping_mut(&mut self) -> &mut MappingData {
        &mut self.mapping
    }

    /// Replace the response with a plain text body.
    pub fn respond_text(&mut self, status: StatusCode, body: impl Into<Bytes>) {
        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.response = response;
    }

    /// Lowercased host the request is addressed to, without the port.
    pub fn server_name(&self) -> Option<String> {
        let raw = self
            .request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.request.uri().host())?;
        let name = strip_port(raw.trim());
        (!name.is_empty()).then(|| name.to_ascii_lowercase())
    }

    /// Request path below the context the request was mapped to.
    pub fn context_relative_path(&self) -> &str {
        let path = self.request.uri().path();
        match self.mapping.context.as_deref() {
            Some(context) if !context.is_empty() => path.strip_prefix(context).unwrap_or(path),
            _ => path,
        }
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_host(host: &str) -> Exchange {
        let request = Request::builder()
            .uri("/app/page")
            .header(header::HOST, host)
            .body(Bytes::new())
            .unwrap();
        Exchange::new(request)
    }

    #[test]
    fn server_name_strips_port_and_case() {
        assert_eq!(with_host("Example.COM:8080").server_name().as_deref(), Some("example.com"));
        assert_eq!(with_host("localhost").server_name().as_deref(), Some("localhost"));
        assert_eq!(with_host("[::1]:8080").server_name().as_deref(), Some("[::1]"));

        let request = Request::builder()
            .uri("http://Other.org:81/x")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(Exchange::new(request).server_name().as_deref(), Some("other.org"));
    }

    #[test]
    fn context_relative_path() {
        let mut exchange = with_host("localhost");
        assert_eq!(exchange.context_relative_path(), "/app/page");
        exchange.mapping_mut().context = Some("/app".to_string());
        assert_eq!(exchange.context_relative_path(), "/page");
        exchange.mapping_mut().context = Some(String::new());
        assert_eq!(exchange.context_relative_path(), "/app/page");
    }
}
