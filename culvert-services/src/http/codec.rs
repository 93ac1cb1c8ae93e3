//! Minimal HTTP/1.x message framing over blocking streams. Bodies are
//! delimited by `Content-Length`; chunked transfer coding is refused.
use std::io::{self, BufRead, Read, Write};

use bytes::Bytes;
use http::{
    header::{self, HeaderName},
    HeaderValue, Method, Request, Response, StatusCode, Uri, Version,
};

use super::{HttpConfig, CLOSE_VALUE, KEEPALIVE_VALUE};

const MAX_HEADERS: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed inside a request head")]
    UnexpectedEof,
    #[error("request head exceeds {0} bytes")]
    HeaderTooLarge(usize),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("transfer coding is not supported")]
    UnsupportedTransferEncoding,
}

impl CodecError {
    /// Status to answer with, `None` when the connection is unusable.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CodecError::Io(_) | CodecError::UnexpectedEof => None,
            CodecError::HeaderTooLarge(_) => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            CodecError::Malformed(_) => Some(StatusCode::BAD_REQUEST),
            CodecError::BodyTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            CodecError::UnsupportedTransferEncoding => Some(StatusCode::NOT_IMPLEMENTED),
        }
    }
}

/// Read one request. `Ok(None)` means the peer closed the connection
/// between requests.
pub fn read_request<R: BufRead>(
    reader: &mut R,
    config: &HttpConfig,
) -> Result<Option<Request<Bytes>>, CodecError> {
    let Some(head) = read_head(reader, config.max_header_bytes)? else {
        return Ok(None);
    };

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    match parsed.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(CodecError::Malformed("incomplete request head".to_string()))
        }
        Err(httparse::Error::TooManyHeaders) => {
            return Err(CodecError::HeaderTooLarge(config.max_header_bytes))
        }
        Err(e) => return Err(CodecError::Malformed(e.to_string())),
    }

    let method = parsed
        .method
        .ok_or_else(|| CodecError::Malformed("missing method".to_string()))
        .and_then(|m| {
            Method::from_bytes(m.as_bytes()).map_err(|e| CodecError::Malformed(e.to_string()))
        })?;
    let uri: Uri = parsed
        .path
        .ok_or_else(|| CodecError::Malformed("missing target".to_string()))?
        .parse()
        .map_err(|e: http::uri::InvalidUri| CodecError::Malformed(e.to_string()))?;
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut builder = Request::builder().method(method).uri(uri).version(version);
    for h in parsed.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        let value =
            HeaderValue::from_bytes(h.value).map_err(|e| CodecError::Malformed(e.to_string()))?;
        builder = builder.header(name, value);
    }
    let mut request = builder
        .body(Bytes::new())
        .map_err(|e| CodecError::Malformed(e.to_string()))?;

    if request.headers().contains_key(header::TRANSFER_ENCODING) {
        return Err(CodecError::UnsupportedTransferEncoding);
    }
    let length = match request.headers().get(header::CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or_else(|| CodecError::Malformed("invalid content-length".to_string()))?,
        None => 0,
    };
    if length > config.max_body_bytes {
        return Err(CodecError::BodyTooLarge(config.max_body_bytes));
    }
    if length > 0 {
        let mut body = vec![0; length];
        reader.read_exact(&mut body).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => CodecError::UnexpectedEof,
            _ => CodecError::Io(e),
        })?;
        *request.body_mut() = Bytes::from(body);
    }
    Ok(Some(request))
}

fn read_head<R: BufRead>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, CodecError> {
    let mut head = Vec::with_capacity(512);
    loop {
        let start = head.len();
        let n = (&mut *reader)
            .take((limit + 1 - start) as u64)
            .read_until(b'\n', &mut head)?;
        if n == 0 {
            return if head.is_empty() {
                Ok(None)
            } else {
                Err(CodecError::UnexpectedEof)
            };
        }
        if head.len() > limit {
            return Err(CodecError::HeaderTooLarge(limit));
        }
        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // stray line break between pipelined requests
                head.clear();
                continue;
            }
            return Ok(Some(head));
        }
        if !line.ends_with(b"\n") {
            return Err(CodecError::UnexpectedEof);
        }
    }
}

/// Serialize `response`. Framing headers are always recomputed from the
/// body and the keep-alive decision.
pub fn write_response<W: Write>(
    writer: &mut W,
    response: &Response<Bytes>,
    version: Version,
    keepalive: bool,
    head_only: bool,
    server: Option<&str>,
) -> io::Result<()> {
    let status = response.status();
    let mut out = Vec::with_capacity(256 + response.body().len());
    let version = if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    };
    out.extend_from_slice(
        format!(
            "{version} {} {}\r\n",
            status.as_str(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );

    for (name, value) in response.headers() {
        if name == header::CONTENT_LENGTH
            || name == header::CONNECTION
            || name == header::TRANSFER_ENCODING
        {
            continue;
        }
        write_header(&mut out, name.as_str(), value.as_bytes());
    }
    if let Some(server) = server {
        if !response.headers().contains_key(header::SERVER) {
            write_header(&mut out, header::SERVER.as_str(), server.as_bytes());
        }
    }
    write_header(
        &mut out,
        header::CONTENT_LENGTH.as_str(),
        response.body().len().to_string().as_bytes(),
    );
    let connection = match (keepalive, version) {
        (true, "HTTP/1.0") => Some(KEEPALIVE_VALUE),
        (false, _) => Some(CLOSE_VALUE),
        _ => None,
    };
    if let Some(connection) = connection {
        write_header(&mut out, header::CONNECTION.as_str(), connection.as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    if !head_only {
        out.extend_from_slice(response.body());
    }
    writer.write_all(&out)?;
    writer.flush()
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;

    use super::*;

    fn read(raw: &[u8]) -> Result<Option<Request<Bytes>>, CodecError> {
        read_request(&mut BufReader::new(raw), &HttpConfig::default())
    }

    #[test]
    fn parses_pipelined_requests() {
        let raw = b"\r\nPOST /a?x=1 HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\n\
                    helloGET /b HTTP/1.0\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let config = HttpConfig::default();

        let first = read_request(&mut reader, &config).unwrap().unwrap();
        assert_eq!(first.method(), Method::POST);
        assert_eq!(first.uri().path(), "/a");
        assert_eq!(first.headers()[header::HOST], "example.com");
        assert_eq!(first.body().as_ref(), b"hello");

        let second = read_request(&mut reader, &config).unwrap().unwrap();
        assert_eq!(second.version(), Version::HTTP_10);
        assert!(second.body().is_empty());

        assert!(read_request(&mut reader, &config).unwrap().is_none());
    }

    #[test]
    fn rejects_bad_requests() {
        assert!(matches!(read(b"GET / HTTP/1.1\r\nHost"), Err(CodecError::UnexpectedEof)));
        let err = read(b"GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_IMPLEMENTED));
        let err = read(b"GET / HTTP/1.1\r\nContent-Length: nope\r\n\r\n").unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));

        let config = HttpConfig {
            max_header_bytes: 32,
            ..Default::default()
        };
        let long = b"GET /a-very-long-path-indeed HTTP/1.1\r\n\r\n";
        let err = read_request(&mut BufReader::new(&long[..]), &config).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE));
        let config = HttpConfig {
            max_body_bytes: 4,
            ..Default::default()
        };
        let big = b"PUT / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let err = read_request(&mut BufReader::new(&big[..]), &config).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::PAYLOAD_TOO_LARGE));
    }

    #[test]
    fn writes_framing_headers() {
        let mut response = Response::new(Bytes::from_static(b"hi"));
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("99"));
        let mut out = Vec::new();
        write_response(&mut out, &response, Version::HTTP_11, false, false, Some("culvert"))
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("server: culvert\r\n"));
        assert!(text.contains("content-length: 2\r\n"));
        assert!(text.contains("connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));

        let mut out = Vec::new();
        write_response(&mut out, &response, Version::HTTP_10, true, true, None).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(text.contains("connection: Keep-Alive\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
