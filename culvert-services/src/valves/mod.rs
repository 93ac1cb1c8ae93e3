//! Valves shipped with the server, registered by
//! [`register_builtins`](crate::register_builtins).
pub mod access_log;
pub mod error_report;
pub mod remote_addr;
pub mod request_dumper;

pub use access_log::AccessLogValve;
pub use error_report::ErrorReportValve;
pub use remote_addr::RemoteAddrValve;
pub use request_dumper::RequestDumperValve;
