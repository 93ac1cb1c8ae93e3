use std::sync::Arc;

use culvert_core::{
    container::{Exchange, Next, Outcome, Valve},
    AnyResult,
};
use serde_json::Value as JsonValue;
use tracing::debug;

pub const VALVE_NAME: &str = "request_dumper";

/// Logs request line, headers and the resulting status at debug level.
pub struct RequestDumperValve;

impl Valve for RequestDumperValve {
    fn name(&self) -> &str {
        VALVE_NAME
    }

    fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome> {
        let container = next.container().to_string();
        let request = exchange.request();
        debug!(
            %container,
            method = %request.method(),
            uri = %request.uri(),
            version = ?request.version(),
            body_len = request.body().len(),
            "request"
        );
        for (name, value) in request.headers() {
            debug!(%container, header = %name, value = ?value, "request header");
        }

        let result = next.proceed(exchange);
        match &result {
            Ok(outcome) => debug!(
                %container,
                ?outcome,
                status = exchange.response().status().as_u16(),
                body_len = exchange.response().body().len(),
                "response"
            ),
            Err(e) => debug!(%container, "request failed: {e:#}"),
        }
        result
    }
}

pub fn create_request_dumper_valve(_params: &JsonValue) -> AnyResult<Arc<dyn Valve>> {
    Ok(Arc::new(RequestDumperValve))
}
