use std::sync::Arc;

use bytes::Bytes;
use culvert_core::{
    container::{Exchange, Next, Outcome, Valve},
    AnyResult,
};
use http::StatusCode;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::common::parse_params;

pub const VALVE_NAME: &str = "error_report";

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorReportConfig {
    /// Include the fault description in 500 responses.
    #[serde(default)]
    pub show_report: bool,
    /// Appended to every report.
    #[serde(default = "default_server_info")]
    pub server_info: bool,
}

impl Default for ErrorReportConfig {
    fn default() -> Self {
        Self {
            show_report: false,
            server_info: default_server_info(),
        }
    }
}

const fn default_server_info() -> bool {
    true
}

/// Converts unmatched requests, request faults and empty error responses
/// into plain text error pages.
pub struct ErrorReportValve {
    config: ErrorReportConfig,
}

impl ErrorReportValve {
    pub fn new(config: ErrorReportConfig) -> Self {
        Self { config }
    }

    fn report(&self, exchange: &mut Exchange, status: StatusCode, detail: Option<String>) {
        let mut body = format!(
            "{} {}\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Error")
        );
        if let Some(detail) = detail {
            body.push_str(&detail);
            body.push('\n');
        }
        if self.config.server_info {
            body.push_str(concat!("culvert/", env!("CARGO_PKG_VERSION"), "\n"));
        }
        exchange.respond_text(status, Bytes::from(body));
    }
}

impl Valve for ErrorReportValve {
    fn name(&self) -> &str {
        VALVE_NAME
    }

    fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome> {
        let container = next.container().to_string();
        match next.proceed(exchange) {
            Ok(Outcome::Handled) => {
                let status = exchange.response().status();
                if (status.is_client_error() || status.is_server_error())
                    && exchange.response().body().is_empty()
                {
                    self.report(exchange, status, None);
                }
            }
            Ok(Outcome::NoHandler) => {
                let path = exchange.request().uri().path().to_string();
                let detail = self.config.show_report.then(|| format!("no resource at {path}"));
                self.report(exchange, StatusCode::NOT_FOUND, detail);
            }
            Err(e) => {
                let uri = exchange.request().uri();
                warn!(container = %container, %uri, "request fault: {e:#}");
                let detail = self.config.show_report.then(|| format!("{e:#}"));
                self.report(exchange, StatusCode::INTERNAL_SERVER_ERROR, detail);
            }
        }
        Ok(Outcome::Handled)
    }
}

pub fn create_error_report_valve(params: &JsonValue) -> AnyResult<Arc<dyn Valve>> {
    let config: ErrorReportConfig = parse_params(params)?;
    Ok(Arc::new(ErrorReportValve::new(config)))
}

#[cfg(test)]
mod tests {
    use culvert_core::{container::RequestHandler, Container};
    use serde_json::json;

    use super::*;

    struct Fails;

    impl RequestHandler for Fails {
        fn name(&self) -> &str {
            "fails"
        }

        fn handle(&self, _exchange: &mut Exchange) -> AnyResult<()> {
            anyhow::bail!("database unavailable")
        }
    }

    struct Forbid;

    impl RequestHandler for Forbid {
        fn name(&self) -> &str {
            "forbid"
        }

        fn handle(&self, exchange: &mut Exchange) -> AnyResult<()> {
            *exchange.response_mut().status_mut() = StatusCode::FORBIDDEN;
            Ok(())
        }
    }

    fn exchange(path: &str) -> Exchange {
        Exchange::new(http::Request::builder().uri(path).body(Bytes::new()).unwrap())
    }

    fn text(exchange: &Exchange) -> String {
        String::from_utf8_lossy(exchange.response().body()).to_string()
    }

    #[test]
    fn unmatched_request_becomes_not_found() {
        let context = Container::context("");
        context.add_valve(create_error_report_valve(&json!({"show_report": true})).unwrap());

        let mut ex = exchange("/nowhere");
        assert_eq!(context.invoke(&mut ex).unwrap(), Outcome::Handled);
        assert_eq!(ex.response().status(), StatusCode::NOT_FOUND);
        assert!(text(&ex).contains("no resource at /nowhere"));
    }

    #[test]
    fn fault_becomes_server_error() {
        let wrapper = Container::wrapper("w");
        wrapper.set_request_handler(Some(Arc::new(Fails)));
        wrapper.add_valve(create_error_report_valve(&JsonValue::Null).unwrap());

        let mut ex = exchange("/");
        assert_eq!(wrapper.invoke(&mut ex).unwrap(), Outcome::Handled);
        assert_eq!(ex.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = text(&ex);
        assert!(body.starts_with("500 Internal Server Error"));
        assert!(!body.contains("database"));
    }

    #[test]
    fn empty_error_responses_get_a_body() {
        let wrapper = Container::wrapper("w");
        wrapper.set_request_handler(Some(Arc::new(Forbid)));
        wrapper.add_valve(create_error_report_valve(&json!({"server_info": false})).unwrap());

        let mut ex = exchange("/");
        wrapper.invoke(&mut ex).unwrap();
        assert_eq!(text(&ex), "403 Forbidden\n");
    }
}
