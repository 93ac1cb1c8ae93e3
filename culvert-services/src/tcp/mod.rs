//! Raw TCP connection handlers.
pub mod echo;

pub use echo::{create_tcp_echo_handler, EchoConfig, TcpEchoHandler};
