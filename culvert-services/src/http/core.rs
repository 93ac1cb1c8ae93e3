use std::{
    io::BufReader,
    net::SocketAddr,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use bytes::Bytes;
use culvert_core::{
    container::{Container, Exchange, Outcome},
    lifecycle::panic_message,
    AnyResult, Connection, ConnectionHandler, Lifecycle,
};
use http::{Method, Request, Response, StatusCode, Version};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use super::{
    codec::{read_request, write_response},
    generate_response, is_conn_keepalive, HttpConfig,
};
use crate::common::parse_params;

pub const HANDLER_NAME: &str = "http";

/// Parses HTTP/1.x requests off a connection and runs each through the
/// engine, honouring keep-alive up to a per-connection request limit.
pub struct HttpCoreHandler {
    engine: Arc<Container>,
    config: HttpConfig,
}

impl HttpCoreHandler {
    pub fn new(engine: Arc<Container>, config: HttpConfig) -> Self {
        HttpCoreHandler { engine, config }
    }

    /// Dispatch one request into the engine and produce the response to
    /// send.
    pub fn serve(&self, request: Request<Bytes>, peer: SocketAddr) -> Response<Bytes> {
        if !self.engine.state().is_available() {
            warn!(engine = %self.engine, "engine is not started, refusing request");
            return generate_response(StatusCode::SERVICE_UNAVAILABLE, true);
        }
        let mut exchange = Exchange::new(request).with_peer(peer);
        match catch_unwind(AssertUnwindSafe(|| self.engine.invoke(&mut exchange))) {
            Ok(Ok(Outcome::Handled)) => exchange.into_response(),
            Ok(Ok(Outcome::NoHandler)) => generate_response(StatusCode::NOT_FOUND, false),
            Ok(Err(e)) => {
                let uri = exchange.request().uri();
                error!(%peer, %uri, "error when processing request: {e:#}");
                generate_response(StatusCode::INTERNAL_SERVER_ERROR, false)
            }
            Err(panic) => {
                error!(%peer, "request processing panicked: {}", panic_message(&panic));
                generate_response(StatusCode::INTERNAL_SERVER_ERROR, false)
            }
        }
    }
}

impl ConnectionHandler for HttpCoreHandler {
    fn process(&self, conn: &mut Connection) -> bool {
        let peer = conn.peer_addr();
        let mut reader = match conn.stream().try_clone() {
            Ok(stream) => BufReader::new(stream),
            Err(e) => {
                warn!(%peer, "unable to clone connection for reading: {e}");
                return false;
            }
        };
        let server = self.config.server.as_deref();

        let mut served = 0;
        loop {
            let request = match read_request(&mut reader, &self.config) {
                Ok(Some(request)) => request,
                Ok(None) => {
                    info!(%peer, "connection closed");
                    break;
                }
                Err(e) => {
                    match e.status() {
                        Some(status) => {
                            warn!(%peer, "rejecting request: {e}");
                            let resp = generate_response(status, true);
                            if let Err(e) =
                                write_response(conn, &resp, Version::HTTP_11, false, false, server)
                            {
                                warn!(%peer, "error when reply client: {e}");
                            }
                        }
                        None => debug!(%peer, "connection dropped: {e}"),
                    }
                    break;
                }
            };
            served += 1;

            let version = request.version();
            let head_only = request.method() == Method::HEAD;
            let keepalive = is_conn_keepalive(request.headers(), version)
                && served < self.config.keepalive_requests;
            let response = self.serve(request, peer);
            let keepalive = keepalive && response.headers().get(http::header::CONNECTION).is_none();

            if let Err(e) = write_response(conn, &response, version, keepalive, head_only, server) {
                warn!(%peer, "error when encode and write response: {e}");
                break;
            }
            if !keepalive {
                break;
            }
        }
        false
    }
}

pub fn create_http_handler(
    engine: &Arc<Container>,
    params: &JsonValue,
) -> AnyResult<Arc<dyn ConnectionHandler>> {
    let config: HttpConfig = parse_params(params)?;
    Ok(Arc::new(HttpCoreHandler::new(engine.clone(), config)))
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::{Ipv4Addr, TcpStream},
        time::Duration,
    };

    use culvert_core::{config::EndpointConfig, container::RequestHandler, Endpoint};

    use super::*;
    use crate::handlers::EchoHandler;

    struct Explode;

    impl RequestHandler for Explode {
        fn name(&self) -> &str {
            "explode"
        }

        fn handle(&self, _exchange: &mut Exchange) -> AnyResult<()> {
            panic!("boom")
        }
    }

    fn engine() -> Arc<Container> {
        let engine = Container::engine("main");
        engine.set_background_interval(-1);
        let host = Container::host("localhost");
        let context = Container::context("/app");
        let echo = Container::wrapper("");
        echo.set_request_handler(Some(Arc::new(EchoHandler)));
        let explode = Container::wrapper("/explode");
        explode.set_request_handler(Some(Arc::new(Explode)));
        context.add_child(echo).unwrap();
        context.add_child(explode).unwrap();
        host.add_child(context).unwrap();
        engine.add_child(host).unwrap();
        engine.set_default_host(Some("localhost"));
        engine
    }

    fn request(path: &str) -> Request<Bytes> {
        Request::builder()
            .uri(path)
            .header(http::header::HOST, "localhost:8080")
            .body(Bytes::new())
            .unwrap()
    }

    fn peer() -> SocketAddr {
        (Ipv4Addr::LOCALHOST, 40000).into()
    }

    #[test]
    fn maps_outcomes_to_statuses() {
        let engine = engine();
        let handler = HttpCoreHandler::new(engine.clone(), HttpConfig::default());
        assert_eq!(
            handler.serve(request("/app/x"), peer()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        engine.start().unwrap();
        let response = handler.serve(request("/app/x"), peer());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"GET /app/x\n");
        assert_eq!(handler.serve(request("/other"), peer()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            handler.serve(request("/app/explode"), peer()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        engine.destroy().unwrap();
    }

    #[test]
    fn serves_keepalive_connections() {
        let engine = engine();
        engine.start().unwrap();
        let handler =
            create_http_handler(&engine, &serde_json::json!({"server": "culvert"})).unwrap();
        let config = EndpointConfig::new("http", Ipv4Addr::LOCALHOST.into(), 0);
        let endpoint = Endpoint::builder(config, handler)
            .build()
            .unwrap();
        endpoint.start().unwrap();

        let mut client = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client
            .write_all(
                b"POST /app/a HTTP/1.1\r\nHost: localhost\r\nContent-Length: 3\r\n\r\nabc\
                  GET /app/b HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            )
            .unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();

        assert_eq!(reply.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(reply.contains("server: culvert\r\n"));
        assert!(reply.contains("\r\n\r\nabc"));
        assert!(reply.ends_with("connection: close\r\n\r\nGET /app/b\n"));

        endpoint.destroy().unwrap();
        engine.destroy().unwrap();
    }
}
