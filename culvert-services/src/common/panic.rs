use std::{panic::AssertUnwindSafe, sync::Arc};

use culvert_core::{
    container::{Exchange, Next, Outcome, Valve},
    lifecycle::panic_message,
    AnyResult,
};
use serde_json::Value as JsonValue;
use tracing::error;

pub const VALVE_NAME: &str = "catch_panic";

#[derive(thiserror::Error, Debug)]
pub enum CatchPanicError {
    #[error("downstream panic: {0}")]
    Panic(String),
}

/// Turns a panic further down the pipeline into an ordinary request fault.
pub struct CatchPanicValve;

impl Valve for CatchPanicValve {
    fn name(&self) -> &str {
        VALVE_NAME
    }

    fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome> {
        let container = next.container().to_string();
        match std::panic::catch_unwind(AssertUnwindSafe(|| next.proceed(exchange))) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                error!(container = %container, "request processing panicked: {message}");
                Err(CatchPanicError::Panic(message).into())
            }
        }
    }
}

pub fn create_catch_panic_valve(_params: &JsonValue) -> AnyResult<Arc<dyn Valve>> {
    Ok(Arc::new(CatchPanicValve))
}
