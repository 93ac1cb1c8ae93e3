use std::sync::Arc;

use culvert_core::{
    container::{Exchange, RequestHandler},
    AnyResult,
};
use http::{header, HeaderValue, StatusCode};
use serde_json::Value as JsonValue;

pub const HANDLER_NAME: &str = "echo";

/// Replies with the request body, or with the request line when the body
/// is empty.
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    fn handle(&self, exchange: &mut Exchange) -> AnyResult<()> {
        let request = exchange.request();
        if request.body().is_empty() {
            let line = format!("{} {}\n", request.method(), request.uri().path());
            exchange.respond_text(StatusCode::OK, line);
            return Ok(());
        }

        let body = request.body().clone();
        let content_type = request.headers().get(header::CONTENT_TYPE).cloned();
        exchange.respond_text(StatusCode::OK, body);
        if let Some(content_type) = content_type {
            exchange
                .response_mut()
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        } else {
            exchange.response_mut().headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
        }
        Ok(())
    }
}

pub fn create_echo_handler(_params: &JsonValue) -> AnyResult<Arc<dyn RequestHandler>> {
    Ok(Arc::new(EchoHandler))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn echoes_body_or_request_line() {
        let request = http::Request::builder()
            .method("POST")
            .uri("/echo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::from_static(b"{\"a\":1}"))
            .unwrap();
        let mut ex = Exchange::new(request);
        EchoHandler.handle(&mut ex).unwrap();
        assert_eq!(ex.response().body().as_ref(), b"{\"a\":1}");
        assert_eq!(
            ex.response().headers()[header::CONTENT_TYPE],
            "application/json"
        );

        let request = http::Request::builder()
            .uri("/ping?x=1")
            .body(Bytes::new())
            .unwrap();
        let mut ex = Exchange::new(request);
        EchoHandler.handle(&mut ex).unwrap();
        assert_eq!(ex.response().body().as_ref(), b"GET /ping\n");
    }
}
