use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    panic::AssertUnwindSafe,
};

use tracing::{debug, error};

use crate::lifecycle::panic_message;

/// An accepted transport channel and the address of its peer.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Shut both directions down. Errors are ignored, the peer may already
    /// be gone.
    pub fn close(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!(peer = %self.peer, "shutdown: {e}");
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Protocol entry point invoked once per accepted connection.
///
/// Returning `true` means the handler kept the connection (for example by
/// cloning the stream into another owner), so the core only drops its own
/// handle. Returning `false` makes the core shut the socket down.
pub trait ConnectionHandler: Send + Sync {
    fn process(&self, conn: &mut Connection) -> bool;
}

/// Optional transport-level negotiation run on the acceptor thread before
/// a connection is dispatched.
pub trait Handshake: Send + Sync {
    fn handshake(&self, conn: &mut Connection) -> io::Result<()>;
}

/// Run the handler with panic isolation and close the socket unless the
/// handler kept it.
pub(crate) fn dispatch(handler: &dyn ConnectionHandler, mut conn: Connection) {
    let kept = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.process(&mut conn))) {
        Ok(kept) => kept,
        Err(panic) => {
            error!(
                peer = %conn.peer_addr(),
                "connection handler panicked: {}",
                panic_message(&panic)
            );
            false
        }
    };
    if !kept {
        conn.close();
    }
}
