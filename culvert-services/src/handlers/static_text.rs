use std::sync::Arc;

use bytes::Bytes;
use culvert_core::{
    container::{Exchange, RequestHandler},
    AnyResult,
};
use http::{header, HeaderValue, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::common::parse_params;

pub const HANDLER_NAME: &str = "static_text";

#[derive(Debug, Clone, Deserialize)]
pub struct StaticTextConfig {
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_status")]
    pub status: u16,
}

impl Default for StaticTextConfig {
    fn default() -> Self {
        Self {
            body: String::new(),
            content_type: default_content_type(),
            status: default_status(),
        }
    }
}

fn default_content_type() -> String {
    "text/plain; charset=utf-8".to_string()
}

const fn default_status() -> u16 {
    200
}

/// Serves one fixed body.
pub struct StaticTextHandler {
    status: StatusCode,
    content_type: HeaderValue,
    body: Bytes,
}

impl StaticTextHandler {
    pub fn new(config: StaticTextConfig) -> AnyResult<Self> {
        Ok(Self {
            status: StatusCode::from_u16(config.status)?,
            content_type: HeaderValue::try_from(config.content_type)?,
            body: Bytes::from(config.body),
        })
    }
}

impl RequestHandler for StaticTextHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    fn handle(&self, exchange: &mut Exchange) -> AnyResult<()> {
        exchange.respond_text(self.status, self.body.clone());
        exchange
            .response_mut()
            .headers_mut()
            .insert(header::CONTENT_TYPE, self.content_type.clone());
        Ok(())
    }
}

pub fn create_static_text_handler(params: &JsonValue) -> AnyResult<Arc<dyn RequestHandler>> {
    let config: StaticTextConfig = parse_params(params)?;
    Ok(Arc::new(StaticTextHandler::new(config)?))
}
