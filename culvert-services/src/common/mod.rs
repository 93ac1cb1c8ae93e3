use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use culvert_core::AnyResult;

pub mod panic;

pub use panic::{create_catch_panic_valve, CatchPanicError, CatchPanicValve};

/// Decode factory parameters; absent parameters yield the defaults.
pub fn parse_params<T>(params: &JsonValue) -> AnyResult<T>
where
    T: DeserializeOwned + Default,
{
    match params {
        JsonValue::Null => Ok(T::default()),
        other => Ok(serde_json::from_value(other.clone())?),
    }
}
