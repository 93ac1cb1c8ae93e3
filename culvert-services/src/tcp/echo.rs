use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use culvert_core::{container::Container, AnyResult, Connection, ConnectionHandler};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::common::parse_params;

pub const HANDLER_NAME: &str = "echo";

#[derive(Debug, Clone, Deserialize)]
pub struct EchoConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

const fn default_buffer_size() -> usize {
    1024
}

/// Writes back whatever the peer sends until it closes its side.
pub struct TcpEchoHandler {
    buffer_size: usize,
}

impl TcpEchoHandler {
    pub fn new(config: EchoConfig) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
        }
    }

    fn relay(&self, conn: &mut Connection) -> io::Result<u64> {
        let mut buffer = vec![0; self.buffer_size];
        let mut total = 0;
        loop {
            let n = conn.read(&mut buffer)?;
            if n == 0 {
                return Ok(total);
            }
            conn.write_all(&buffer[..n])?;
            total += n as u64;
        }
    }
}

impl ConnectionHandler for TcpEchoHandler {
    fn process(&self, conn: &mut Connection) -> bool {
        match self.relay(conn) {
            Ok(bytes) => info!(peer = %conn.peer_addr(), bytes, "tcp relay finished successfully"),
            Err(e) => warn!(peer = %conn.peer_addr(), "tcp relay failed: {e}"),
        }
        false
    }
}

/// The engine is not consulted; echo connections never reach the container
/// tree.
pub fn create_tcp_echo_handler(
    _engine: &Arc<Container>,
    params: &JsonValue,
) -> AnyResult<Arc<dyn ConnectionHandler>> {
    let config: EchoConfig = parse_params(params)?;
    Ok(Arc::new(TcpEchoHandler::new(config)))
}
