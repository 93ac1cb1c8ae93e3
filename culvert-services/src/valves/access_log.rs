use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use culvert_core::{
    container::{Exchange, Next, Outcome, Valve},
    AnyResult,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::common::parse_params;

pub const VALVE_NAME: &str = "access_log";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessLogConfig {
    /// Included in every line to tell several access logs apart.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// One `tracing` event per request, emitted after the rest of the pipeline
/// completed.
pub struct AccessLogValve {
    prefix: String,
    requests: AtomicU64,
    faults: AtomicU64,
}

impl AccessLogValve {
    pub fn new(config: AccessLogConfig) -> Self {
        Self {
            prefix: config.prefix.unwrap_or_else(|| VALVE_NAME.to_string()),
            requests: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Valve for AccessLogValve {
    fn name(&self) -> &str {
        VALVE_NAME
    }

    fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome> {
        let started = Instant::now();
        let method = exchange.request().method().clone();
        let uri = exchange.request().uri().clone();
        let result = next.proceed(exchange);
        self.requests.fetch_add(1, Ordering::Relaxed);

        let status = match &result {
            Ok(Outcome::Handled) => exchange.response().status().as_u16(),
            Ok(Outcome::NoHandler) => 404,
            Err(_) => {
                self.faults.fetch_add(1, Ordering::Relaxed);
                500
            }
        };
        info!(
            log = %self.prefix,
            peer = ?exchange.peer_addr(),
            host = ?exchange.mapping().host,
            %method,
            %uri,
            status,
            elapsed_us = started.elapsed().as_micros() as u64,
            "request"
        );
        result
    }

    fn background_process(&self) {
        debug!(
            log = %self.prefix,
            requests = self.requests.load(Ordering::Relaxed),
            faults = self.faults.load(Ordering::Relaxed),
            "access log totals"
        );
    }
}

pub fn create_access_log_valve(params: &JsonValue) -> AnyResult<Arc<dyn Valve>> {
    let config: AccessLogConfig = parse_params(params)?;
    Ok(Arc::new(AccessLogValve::new(config)))
}
