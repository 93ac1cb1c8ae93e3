//! Connection endpoint: listening socket, acceptor threads and the worker
//! pool (or a shared [`Executor`]) that connections are handed to.
//!
//! Every accepted connection is prepared on the acceptor thread (socket
//! options and the optional [`Handshake`]) and then passed to
//! [`ConnectionHandler::process`] on a worker. Workers are plain OS threads
//! kept in a LIFO reserve; each one owns a single-slot channel, so at most
//! one connection is associated with a worker at any time.
use std::{
    collections::HashSet,
    fmt,
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, info, warn};

use crate::{
    config::EndpointConfig,
    lifecycle::{Lifecycle, LifecycleListener, LifecycleState, LifecycleSupport},
    Error, Result,
};

mod connection;
mod executor;
mod pool;
mod worker;

pub use connection::{Connection, ConnectionHandler, Handshake};
pub use executor::{Executor, ExecutorStats, RejectedTask, StandardExecutor, Task};
pub use pool::PoolStats;

use pool::WorkerPool;
use worker::WorkerHandle;

const PAUSE_POLL: Duration = Duration::from_millis(50);
const UNLOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// A listening endpoint. Cheap to clone; clones share the same socket and
/// workers.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

struct Shared {
    config: RwLock<EndpointConfig>,
    handler: Arc<dyn ConnectionHandler>,
    handshake: Option<Arc<dyn Handshake>>,
    executor: Option<Arc<dyn Executor>>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: RwLock<Option<SocketAddr>>,
    running: AtomicBool,
    paused: AtomicBool,
    pool: Arc<WorkerPool<WorkerHandle>>,
    acceptors: Mutex<Vec<JoinHandle<()>>>,
    /// Local addresses of our own wake-up connections.
    wakeups: Mutex<HashSet<SocketAddr>>,
    lifecycle: LifecycleSupport,
}

pub struct EndpointBuilder {
    config: EndpointConfig,
    handler: Arc<dyn ConnectionHandler>,
    handshake: Option<Arc<dyn Handshake>>,
    executor: Option<Arc<dyn Executor>>,
}

impl EndpointBuilder {
    pub fn handshake(mut self, handshake: Arc<dyn Handshake>) -> Self {
        self.handshake = Some(handshake);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<Endpoint> {
        let mut config = self.config;
        if let Some(executor) = &self.executor {
            config.executor.get_or_insert_with(|| executor.name().to_string());
        }
        config.validate()?;
        if let (Some(name), None) = (&config.executor, &self.executor) {
            return Err(invalid_config!(
                "endpoint {}: executor {name} was not supplied",
                config.name
            ));
        }
        let max_workers = config.max_workers;
        Ok(Endpoint {
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                handler: self.handler,
                handshake: self.handshake,
                executor: self.executor,
                listener: Mutex::new(None),
                local_addr: RwLock::new(None),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                pool: Arc::new(WorkerPool::new(max_workers)),
                acceptors: Mutex::new(Vec::new()),
                wakeups: Mutex::new(HashSet::new()),
                lifecycle: LifecycleSupport::new(),
            }),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStats {
    pub name: String,
    pub local_addr: Option<SocketAddr>,
    pub state: LifecycleState,
    pub running: bool,
    pub paused: bool,
    pub executor: Option<String>,
    #[serde(flatten)]
    pub pool: PoolStats,
}

impl Endpoint {
    pub fn builder(config: EndpointConfig, handler: Arc<dyn ConnectionHandler>) -> EndpointBuilder {
        EndpointBuilder {
            config,
            handler,
            handshake: None,
            executor: None,
        }
    }

    pub fn name(&self) -> String {
        self.shared.config.read().name.clone()
    }

    pub fn config(&self) -> EndpointConfig {
        self.shared.config.read().clone()
    }

    /// The bound address, available once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.read()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Stop dispatching new connections without releasing the socket.
    pub fn pause(&self) {
        let shared = &self.shared;
        if shared.running.load(Ordering::Acquire) && !shared.paused.swap(true, Ordering::AcqRel) {
            info!(endpoint = %self.name(), "pausing");
            for _ in 0..shared.acceptor_count() {
                shared.unlock_accept();
            }
        }
    }

    pub fn resume(&self) {
        if self.shared.running.load(Ordering::Acquire)
            && self.shared.paused.swap(false, Ordering::AcqRel)
        {
            info!(endpoint = %self.name(), "resuming");
        }
    }

    /// Change the worker cap. Busy workers are never interrupted.
    pub fn set_max_workers(&self, max_workers: isize) -> Result<()> {
        let mut config = self.shared.config.write();
        config.validate_max_workers(max_workers)?;
        config.max_workers = max_workers;
        self.shared.pool.resize(max_workers);
        Ok(())
    }

    pub fn stats(&self) -> EndpointStats {
        let config = self.shared.config.read();
        EndpointStats {
            name: config.name.clone(),
            local_addr: self.local_addr(),
            state: self.shared.lifecycle.state(),
            running: self.is_running(),
            paused: self.is_paused(),
            executor: config.executor.clone(),
            pool: self.shared.pool.stats(),
        }
    }

    /// Close the listening socket of an endpoint that is bound but not
    /// running. Starting it later binds again.
    pub(crate) fn unbind(&self) {
        if self.is_running() {
            return;
        }
        if self.shared.listener.lock().take().is_some() {
            *self.shared.local_addr.write() = None;
            debug!(endpoint = %self.name(), "listening socket released");
        }
    }

    /// Hand a connection to a worker or the shared executor. The connection
    /// is closed when the handoff fails.
    pub fn process_connection(&self, conn: Connection) -> Result<()> {
        self.shared.process_connection(conn)
    }
}

impl Shared {
    fn name(&self) -> String {
        self.config.read().name.clone()
    }

    fn acceptor_count(&self) -> usize {
        self.config.read().acceptor_threads.max(1)
    }

    fn bind(&self) -> Result<()> {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return Ok(());
        }
        let (addr, backlog) = {
            let config = self.config.read();
            (config.socket_addr(), config.backlog)
        };
        let bind_err = |source| Error::Bind { addr, source };
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.listen(backlog).map_err(bind_err)?;
        let bound: TcpListener = socket.into();
        let local = bound.local_addr().map_err(bind_err)?;
        *self.local_addr.write() = Some(local);
        *listener = Some(bound);
        info!(endpoint = %self.name(), addr = %local, backlog, "endpoint bound");
        Ok(())
    }

    fn start_acceptors(self: &Arc<Self>) -> Result<()> {
        self.bind()?;
        let (name, max_workers) = {
            let config = self.config.read();
            (config.name.clone(), config.max_workers)
        };
        if self.executor.is_none() {
            self.pool.reopen(max_workers);
        }
        self.paused.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);

        let listener = self.listener.lock();
        let Some(listener) = listener.as_ref() else {
            return Err(Error::lifecycle(name, "listening socket is closed"));
        };
        let mut acceptors = self.acceptors.lock();
        for i in 0..self.acceptor_count() {
            let spawned = listener.try_clone().and_then(|socket| {
                let shared = self.clone();
                thread::Builder::new()
                    .name(format!("{name}-acceptor-{i}"))
                    .spawn(move || shared.accept_loop(socket))
            });
            match spawned {
                Ok(handle) => acceptors.push(handle),
                Err(e) => {
                    self.running.store(false, Ordering::Release);
                    return Err(Error::lifecycle(name, format!("unable to start acceptor: {e}")));
                }
            }
        }
        info!(
            endpoint = %name,
            acceptors = acceptors.len(),
            executor = ?self.executor.as_ref().map(|e| e.name().to_string()),
            "endpoint started"
        );
        Ok(())
    }

    fn accept_loop(&self, listener: TcpListener) {
        let name = self.name();
        while self.running.load(Ordering::Acquire) {
            if self.paused.load(Ordering::Acquire) {
                thread::sleep(PAUSE_POLL);
                continue;
            }
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    if self.running.load(Ordering::Acquire) {
                        warn!(endpoint = %name, "{}", Error::Accept(e));
                    }
                    continue;
                }
            };
            let conn = Connection::new(stream, peer);
            if self.wakeups.lock().remove(&peer) {
                debug!(endpoint = %name, %peer, "discarding wake-up connection");
                conn.close();
                continue;
            }
            if !self.running.load(Ordering::Acquire) || self.paused.load(Ordering::Acquire) {
                debug!(endpoint = %name, %peer, "closing connection accepted while paused");
                conn.close();
                continue;
            }
            let conn = match self.prepare(conn) {
                Ok(conn) => conn,
                Err((conn, e)) => {
                    debug!(endpoint = %name, %peer, "unable to prepare connection: {e}");
                    conn.close();
                    continue;
                }
            };
            if let Err(e) = self.process_connection(conn) {
                warn!(endpoint = %name, %peer, "{e}");
            }
        }
        debug!(endpoint = %name, "acceptor exiting");
    }

    fn prepare(
        &self,
        mut conn: Connection,
    ) -> std::result::Result<Connection, (Connection, io::Error)> {
        let (linger, no_delay, read_timeout) = {
            let config = self.config.read();
            (config.linger(), config.tcp_no_delay, config.read_timeout())
        };
        let applied = {
            let socket = SockRef::from(conn.stream());
            socket
                .set_linger(linger)
                .and_then(|_| socket.set_nodelay(no_delay))
                .and_then(|_| socket.set_read_timeout(read_timeout))
        };
        let negotiated = applied.and_then(|_| match &self.handshake {
            Some(handshake) => handshake.handshake(&mut conn),
            None => Ok(()),
        });
        match negotiated {
            Ok(()) => Ok(conn),
            Err(e) => Err((conn, e)),
        }
    }

    fn process_connection(&self, conn: Connection) -> Result<()> {
        if let Some(executor) = &self.executor {
            let handler = self.handler.clone();
            return executor
                .execute(Box::new(move || connection::dispatch(handler.as_ref(), conn)))
                .map_err(|rejected| Error::Handoff(rejected.to_string()));
        }

        let prefix = self.name();
        let worker = self.pool.acquire_with(|id| {
            worker::spawn(&prefix, id, self.handler.clone(), self.pool.clone())
        });
        match worker {
            Ok(worker) => worker.assign(conn),
            Err(e) => {
                conn.close();
                Err(e)
            }
        }
    }

    /// Connect to ourselves so a thread blocked in `accept` wakes up.
    fn unlock_accept(&self) -> bool {
        let Some(mut addr) = *self.local_addr.read() else {
            return false;
        };
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        match self.connect_wakeup(addr) {
            Ok(()) => true,
            Err(e) => {
                debug!(endpoint = %self.name(), %addr, "unable to unlock acceptor: {e}");
                false
            }
        }
    }

    /// The source address is registered before connecting, so whichever
    /// acceptor takes the connection, now or after a restart, discards it.
    fn connect_wakeup(&self, addr: SocketAddr) -> io::Result<()> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.bind(&SocketAddr::new(addr.ip(), 0).into())?;
        let local = socket.local_addr()?.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "wake-up socket has no address")
        })?;
        self.wakeups.lock().insert(local);
        if let Err(e) = socket.connect_timeout(&addr.into(), UNLOCK_TIMEOUT) {
            self.wakeups.lock().remove(&local);
            return Err(e);
        }
        let _ = socket.set_linger(Some(Duration::ZERO));
        Ok(())
    }

    fn stop_acceptors(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.paused.store(false, Ordering::Release);
        let acceptors = std::mem::take(&mut *self.acceptors.lock());
        let mut unlocked = true;
        for _ in 0..acceptors.len() {
            unlocked &= self.unlock_accept();
        }
        self.pool.close();
        if unlocked {
            for acceptor in acceptors {
                let _ = acceptor.join();
            }
        } else {
            warn!(
                endpoint = %self.name(),
                "acceptors could not be unlocked, not waiting for them"
            );
        }
        info!(endpoint = %self.name(), "endpoint stopped");
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("config", &*self.shared.config.read())
            .field("local_addr", &self.local_addr())
            .field("state", &self.shared.lifecycle.state())
            .finish()
    }
}

impl Lifecycle for Endpoint {
    fn component_name(&self) -> String {
        format!("Endpoint[{}]", self.name())
    }

    fn state(&self) -> LifecycleState {
        self.shared.lifecycle.state()
    }

    fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.shared.lifecycle.add_listener(listener)
    }

    fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) -> bool {
        self.shared.lifecycle.remove_listener(listener)
    }

    fn find_lifecycle_listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.shared.lifecycle.listeners()
    }

    /// Bind the listening socket.
    fn init(&self) -> Result<()> {
        self.shared.lifecycle.init(self, || self.shared.bind())
    }

    fn start(&self) -> Result<()> {
        if self.state() == LifecycleState::New {
            self.init()?;
        }
        self.shared
            .lifecycle
            .start(self, || self.shared.start_acceptors())
    }

    fn stop(&self) -> Result<()> {
        self.shared.lifecycle.stop(self, || {
            self.shared.stop_acceptors();
            Ok(())
        })
    }

    /// Stop if needed and close the listening socket.
    fn destroy(&self) -> Result<()> {
        self.stop()?;
        self.shared.lifecycle.destroy(self, || {
            if self.shared.listener.lock().take().is_some() {
                debug!(endpoint = %self.name(), "listening socket closed");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, BufReader, Read, Write},
        net::TcpStream,
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
    };

    use super::*;
    use crate::config::ExecutorConfig;

    /// Reads one line and answers `ok`. Connections that carry no data are
    /// not reported.
    struct LineHandler(Mutex<mpsc::Sender<String>>);

    impl ConnectionHandler for LineHandler {
        fn process(&self, conn: &mut Connection) -> bool {
            let mut line = String::new();
            let read = match conn.stream().try_clone() {
                Ok(stream) => BufReader::new(stream).read_line(&mut line),
                Err(_) => return false,
            };
            if matches!(read, Ok(n) if n > 0) {
                let _ = self.0.lock().send(line.trim_end().to_string());
                let _ = conn.write_all(b"ok\n");
            }
            false
        }
    }

    fn endpoint(max_workers: isize) -> (Endpoint, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let mut config = EndpointConfig::new("test", Ipv4Addr::LOCALHOST.into(), 0);
        config.max_workers = max_workers;
        config.read_timeout_ms = 5_000;
        let endpoint = Endpoint::builder(config, Arc::new(LineHandler(Mutex::new(tx))))
            .build()
            .unwrap();
        (endpoint, rx)
    }

    /// Counts every dispatched connection, including ones that carry no data.
    #[derive(Default)]
    struct CountingHandler(AtomicUsize);

    impl ConnectionHandler for CountingHandler {
        fn process(&self, _conn: &mut Connection) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    /// Greets the client before dispatch, or refuses the connection.
    struct Greeting {
        accept: bool,
    }

    impl Handshake for Greeting {
        fn handshake(&self, conn: &mut Connection) -> io::Result<()> {
            if !self.accept {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "refused"));
            }
            conn.write_all(b"hello\n")
        }
    }

    /// The server side closed the connection: end of stream or a reset,
    /// but never data and never a read timeout.
    fn assert_closed_by_server(mut client: TcpStream) {
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 64];
        match client.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => panic!("unexpected data: {:?}", &buf[..n]),
            Err(e) => assert!(
                !matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
                "connection left open: {e}"
            ),
        }
    }

    fn send_line(addr: SocketAddr, line: &str) -> TcpStream {
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(format!("{line}\n").as_bytes()).unwrap();
        client
    }

    fn read_reply(client: TcpStream) -> String {
        let mut reply = String::new();
        BufReader::new(client).read_line(&mut reply).unwrap();
        reply
    }

    #[test]
    fn serves_connections_and_reuses_workers() {
        let (endpoint, rx) = endpoint(1);
        endpoint.start().unwrap();
        let addr = endpoint.local_addr().unwrap();

        for i in 0..3 {
            let client = send_line(addr, &format!("hello {i}"));
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), format!("hello {i}"));
            assert_eq!(read_reply(client), "ok\n");
        }
        assert_eq!(endpoint.stats().pool.current_workers, 1);

        endpoint.stop().unwrap();
        endpoint.destroy().unwrap();
        endpoint.destroy().unwrap();
        assert_eq!(endpoint.state(), LifecycleState::Destroyed);
    }

    #[test]
    fn bind_failure_is_reported() {
        let (first, _rx) = endpoint(4);
        first.init().unwrap();
        let taken = first.local_addr().unwrap();

        let (tx, _rx2) = mpsc::channel();
        let mut config = EndpointConfig::new("clash", taken.ip(), taken.port());
        config.backlog = 10;
        let clash = Endpoint::builder(config, Arc::new(LineHandler(Mutex::new(tx))))
            .build()
            .unwrap();
        let err = clash.init().unwrap_err();
        assert!(matches!(err, Error::Bind { addr, .. } if addr == taken));
        assert_eq!(clash.state(), LifecycleState::New);
        first.destroy().unwrap();
    }

    #[test]
    fn pause_stops_dispatch_until_resume() {
        let (endpoint, rx) = endpoint(2);
        endpoint.start().unwrap();
        let addr = endpoint.local_addr().unwrap();

        endpoint.pause();
        assert!(endpoint.is_paused());
        let client = send_line(addr, "while paused");
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        endpoint.resume();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "while paused");
        assert_eq!(read_reply(client), "ok\n");
        assert_eq!(endpoint.state(), LifecycleState::Started);
        endpoint.destroy().unwrap();
    }

    #[test]
    fn shared_executor_replaces_worker_pool() {
        let executor = Arc::new(StandardExecutor::new(ExecutorConfig::new("shared")).unwrap());
        executor.start().unwrap();

        let (tx, rx) = mpsc::channel();
        let mut config = EndpointConfig::new("pooled", Ipv4Addr::LOCALHOST.into(), 0);
        config.max_workers = -1;
        let endpoint = Endpoint::builder(config, Arc::new(LineHandler(Mutex::new(tx))))
            .executor(executor.clone())
            .build()
            .unwrap();
        endpoint.start().unwrap();

        let client = send_line(endpoint.local_addr().unwrap(), "via executor");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "via executor");
        assert_eq!(read_reply(client), "ok\n");
        assert_eq!(endpoint.stats().pool.current_workers, 0);
        assert_eq!(endpoint.stats().executor.as_deref(), Some("shared"));

        endpoint.destroy().unwrap();
        executor.destroy().unwrap();
    }

    #[test]
    fn worker_limits_are_validated() {
        let (tx, _rx) = mpsc::channel();
        let mut config = EndpointConfig::new("bad", Ipv4Addr::LOCALHOST.into(), 0);
        config.max_workers = 0;
        let handler: Arc<dyn ConnectionHandler> = Arc::new(LineHandler(Mutex::new(tx)));
        assert!(matches!(
            Endpoint::builder(config.clone(), handler.clone()).build(),
            Err(Error::InvalidConfig(_))
        ));

        config.executor = Some("missing".to_string());
        config.max_workers = 10;
        assert!(Endpoint::builder(config, handler).build().is_err());

        let (endpoint, _rx) = endpoint(4);
        assert!(endpoint.set_max_workers(0).is_err());
        assert!(endpoint.set_max_workers(-1).is_err());
        endpoint.set_max_workers(8).unwrap();
        assert_eq!(endpoint.stats().pool.max_workers, 8);
    }

    #[test]
    fn stop_then_start_serves_again() {
        let (endpoint, rx) = endpoint(2);
        endpoint.start().unwrap();
        endpoint.stop().unwrap();
        assert!(!endpoint.is_running());

        endpoint.start().unwrap();
        let client = send_line(endpoint.local_addr().unwrap(), "again");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "again");
        assert_eq!(read_reply(client), "ok\n");
        endpoint.destroy().unwrap();
    }

    #[test]
    fn wake_up_connections_never_reach_the_handler() {
        let handler = Arc::new(CountingHandler::default());
        let config = EndpointConfig::new("quiet", Ipv4Addr::LOCALHOST.into(), 0);
        let endpoint = Endpoint::builder(config, handler.clone()).build().unwrap();
        endpoint.start().unwrap();

        endpoint.pause();
        thread::sleep(Duration::from_millis(200));
        endpoint.stop().unwrap();
        endpoint.start().unwrap();
        thread::sleep(Duration::from_millis(500));
        assert_eq!(handler.0.load(Ordering::SeqCst), 0);

        let client = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();
        assert_closed_by_server(client);
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
        endpoint.destroy().unwrap();
    }

    #[test]
    fn handshake_runs_before_dispatch() {
        let (tx, rx) = mpsc::channel();
        let config = EndpointConfig::new("greeting", Ipv4Addr::LOCALHOST.into(), 0);
        let endpoint = Endpoint::builder(config, Arc::new(LineHandler(Mutex::new(tx))))
            .handshake(Arc::new(Greeting { accept: true }))
            .build()
            .unwrap();
        endpoint.start().unwrap();

        let client = send_line(endpoint.local_addr().unwrap(), "after greeting");
        let mut reader = BufReader::new(client);
        let mut greeting = String::new();
        reader.read_line(&mut greeting).unwrap();
        assert_eq!(greeting, "hello\n");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "after greeting");
        let mut reply = String::new();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "ok\n");
        endpoint.destroy().unwrap();
    }

    #[test]
    fn failed_handshake_closes_the_connection() {
        let (tx, rx) = mpsc::channel();
        let config = EndpointConfig::new("refusing", Ipv4Addr::LOCALHOST.into(), 0);
        let endpoint = Endpoint::builder(config, Arc::new(LineHandler(Mutex::new(tx))))
            .handshake(Arc::new(Greeting { accept: false }))
            .build()
            .unwrap();
        endpoint.start().unwrap();

        let client = send_line(endpoint.local_addr().unwrap(), "never handled");
        assert_closed_by_server(client);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(endpoint.stats().pool.current_workers, 0);
        endpoint.destroy().unwrap();
    }

    #[test]
    fn rejected_handoff_closes_the_client_socket() {
        // never started, so every task is rejected
        let executor = Arc::new(StandardExecutor::new(ExecutorConfig::new("idle")).unwrap());
        let (tx, rx) = mpsc::channel();
        let mut config = EndpointConfig::new("rejecting", Ipv4Addr::LOCALHOST.into(), 0);
        config.max_workers = -1;
        let endpoint = Endpoint::builder(config, Arc::new(LineHandler(Mutex::new(tx))))
            .executor(executor)
            .build()
            .unwrap();
        endpoint.start().unwrap();

        let client = send_line(endpoint.local_addr().unwrap(), "dropped");
        assert_closed_by_server(client);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        endpoint.destroy().unwrap();
    }
}
