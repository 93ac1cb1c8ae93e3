//! Valves, request handlers and connection handlers that ship with the
//! server, plus [`register_builtins`] to make them available by name.
use culvert_core::{ComponentRegistry, Result};

pub mod common;
pub mod handlers;
pub mod http;
pub mod tcp;
pub mod valves;

/// Register every built-in unit under its configuration identifier.
pub fn register_builtins(registry: &mut ComponentRegistry) -> Result<()> {
    registry.register_valve(
        valves::access_log::VALVE_NAME,
        valves::access_log::create_access_log_valve,
    )?;
    registry.register_valve(
        valves::error_report::VALVE_NAME,
        valves::error_report::create_error_report_valve,
    )?;
    registry.register_valve(
        valves::remote_addr::VALVE_NAME,
        valves::remote_addr::create_remote_addr_valve,
    )?;
    registry.register_valve(
        valves::request_dumper::VALVE_NAME,
        valves::request_dumper::create_request_dumper_valve,
    )?;
    registry.register_valve(common::panic::VALVE_NAME, common::create_catch_panic_valve)?;

    registry.register_request_handler(
        handlers::echo::HANDLER_NAME,
        handlers::echo::create_echo_handler,
    )?;
    registry.register_request_handler(
        handlers::static_text::HANDLER_NAME,
        handlers::static_text::create_static_text_handler,
    )?;
    registry.register_request_handler(
        handlers::status::HANDLER_NAME,
        handlers::status::create_status_handler,
    )?;

    registry.register_connection_handler(http::core::HANDLER_NAME, http::create_http_handler)?;
    registry.register_connection_handler(tcp::echo::HANDLER_NAME, tcp::create_tcp_echo_handler)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use culvert_core::config::ComponentConfig;

    use super::*;

    #[test]
    fn builtins_are_registered_once() {
        let mut registry = ComponentRegistry::new();
        register_builtins(&mut registry).unwrap();
        assert_eq!(
            registry.valve_names().collect::<Vec<_>>(),
            vec!["access_log", "catch_panic", "error_report", "remote_addr", "request_dumper"]
        );
        assert_eq!(
            registry.request_handler_names().collect::<Vec<_>>(),
            vec!["echo", "static_text", "status"]
        );
        assert_eq!(
            registry.connection_handler_names().collect::<Vec<_>>(),
            vec!["echo", "http"]
        );
        assert!(registry.build_valve(&ComponentConfig::new("access_log")).is_ok());
        assert!(register_builtins(&mut registry).is_err());
    }
}
