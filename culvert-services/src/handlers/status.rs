use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use culvert_core::{
    container::{Exchange, RequestHandler},
    AnyResult,
};
use http::{header, HeaderValue, StatusCode};
use serde::Serialize;
use serde_json::Value as JsonValue;

pub const HANDLER_NAME: &str = "status";

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    host: Option<&'a str>,
    context: Option<&'a str>,
    wrapper: Option<&'a str>,
    uptime_secs: u64,
    requests: u64,
}

/// Reports how the request was mapped plus a few counters, as JSON.
pub struct StatusHandler {
    started: Instant,
    requests: AtomicU64,
}

impl Default for StatusHandler {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
        }
    }
}

impl RequestHandler for StatusHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    fn handle(&self, exchange: &mut Exchange) -> AnyResult<()> {
        let requests = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        let mapping = exchange.mapping();
        let report = StatusReport {
            host: mapping.host.as_deref(),
            context: mapping.context.as_deref(),
            wrapper: mapping.wrapper.as_deref(),
            uptime_secs: self.started.elapsed().as_secs(),
            requests,
        };
        let body = serde_json::to_vec(&report)?;
        exchange.respond_text(StatusCode::OK, body);
        exchange.response_mut().headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(())
    }
}

pub fn create_status_handler(_params: &JsonValue) -> AnyResult<Arc<dyn RequestHandler>> {
    Ok(Arc::new(StatusHandler::default()))
}
