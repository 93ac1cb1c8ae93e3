//! Configuration structures consumed by the core.
//!
//! Reading and parsing configuration files is left to the embedding binary;
//! these types only describe the values and validate them.
use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::Result;

pub const DEFAULT_BACKLOG: i32 = 100;
pub const DEFAULT_MAX_WORKERS: isize = 200;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_EXECUTOR_MAX_THREADS: usize = 200;
pub const DEFAULT_EXECUTOR_MIN_SPARE: usize = 25;
pub const DEFAULT_EXECUTOR_IDLE_MS: u64 = 60_000;
pub const DEFAULT_EXECUTOR_QUEUE: usize = usize::MAX;
pub const DEFAULT_ENGINE_INTERVAL_SECS: i64 = 10;

macro_rules! define_const {
    ($name: ident, $val: expr, $type: ty) => {
        const fn $name() -> $type {
            $val
        }
    };
}

define_const!(default_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED), IpAddr);
define_const!(default_backlog, DEFAULT_BACKLOG, i32);
define_const!(default_acceptor_threads, 1, usize);
define_const!(default_tcp_no_delay, true, bool);
define_const!(default_read_timeout_ms, DEFAULT_READ_TIMEOUT_MS, u64);
define_const!(default_max_workers, DEFAULT_MAX_WORKERS, isize);
define_const!(default_executor_max_threads, DEFAULT_EXECUTOR_MAX_THREADS, usize);
define_const!(default_executor_min_spare, DEFAULT_EXECUTOR_MIN_SPARE, usize);
define_const!(default_executor_idle_ms, DEFAULT_EXECUTOR_IDLE_MS, u64);
define_const!(default_executor_queue, DEFAULT_EXECUTOR_QUEUE, usize);

/// Listening endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    #[serde(default = "default_address")]
    pub address: IpAddr,
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_acceptor_threads")]
    pub acceptor_threads: usize,
    /// `SO_LINGER` in seconds, disabled when absent.
    #[serde(default)]
    pub linger_secs: Option<u64>,
    #[serde(default = "default_tcp_no_delay")]
    pub tcp_no_delay: bool,
    /// 0 disables the read timeout.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// `-1` unbounded, `> 0` hard cap.
    #[serde(default = "default_max_workers")]
    pub max_workers: isize,
    #[serde(default)]
    pub allow_unbounded_workers: bool,
    /// Name of a shared executor that replaces the internal worker pool.
    #[serde(default)]
    pub executor: Option<String>,
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, address: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            address,
            port,
            backlog: default_backlog(),
            acceptor_threads: default_acceptor_threads(),
            linger_secs: None,
            tcp_no_delay: default_tcp_no_delay(),
            read_timeout_ms: default_read_timeout_ms(),
            max_workers: default_max_workers(),
            allow_unbounded_workers: false,
            executor: None,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(invalid_config!("endpoint name must not be empty"));
        }
        if self.backlog <= 0 {
            return Err(invalid_config!(
                "endpoint {}: backlog must be positive, got {}",
                self.name,
                self.backlog
            ));
        }
        self.validate_max_workers(self.max_workers)
    }

    pub(crate) fn validate_max_workers(&self, max_workers: isize) -> Result<()> {
        if max_workers == 0 {
            return Err(invalid_config!(
                "endpoint {}: max_workers must not be 0",
                self.name
            ));
        }
        if max_workers < 0 && self.executor.is_none() && !self.allow_unbounded_workers {
            return Err(invalid_config!(
                "endpoint {}: unbounded workers require an executor or allow_unbounded_workers",
                self.name
            ));
        }
        Ok(())
    }
}

/// Shared thread pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub name: String,
    #[serde(default = "default_executor_max_threads")]
    pub max_threads: usize,
    #[serde(default = "default_executor_min_spare")]
    pub min_spare_threads: usize,
    #[serde(default = "default_executor_idle_ms")]
    pub max_idle_ms: u64,
    #[serde(default = "default_executor_queue")]
    pub max_queue_size: usize,
}

impl ExecutorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_threads: default_executor_max_threads(),
            min_spare_threads: default_executor_min_spare(),
            max_idle_ms: default_executor_idle_ms(),
            max_queue_size: default_executor_queue(),
        }
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(invalid_config!("executor name must not be empty"));
        }
        if self.max_threads == 0 {
            return Err(invalid_config!(
                "executor {}: max_threads must be positive",
                self.name
            ));
        }
        if self.max_queue_size == 0 {
            return Err(invalid_config!(
                "executor {}: max_queue_size must be positive",
                self.name
            ));
        }
        if self.max_idle_ms == 0 {
            return Err(invalid_config!(
                "executor {}: max_idle_ms must be positive",
                self.name
            ));
        }
        Ok(())
    }
}

/// A pluggable unit: registry identifier plus free-form parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ComponentConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: serde_json::Value::Null,
        }
    }
}

/// Settings shared by every container tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerConfig {
    pub name: String,
    #[serde(default)]
    pub valves: Vec<ComponentConfig>,
    /// Background tick in seconds; the tier default applies when absent.
    #[serde(default)]
    pub background_interval_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(flatten)]
    pub container: ContainerConfig,
    pub default_host: String,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(flatten)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Registry identifier of the valve appended to the pipeline at start.
    #[serde(default)]
    pub error_report_valve: Option<String>,
    #[serde(default)]
    pub contexts: Vec<ContextConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextConfig {
    #[serde(flatten)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub wrappers: Vec<WrapperConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WrapperConfig {
    #[serde(flatten)]
    pub container: ContainerConfig,
    pub handler: ComponentConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.container.name.is_empty() {
            return Err(invalid_config!("engine name must not be empty"));
        }
        let mut hosts = HashSet::new();
        for host in &self.hosts {
            host.validate()?;
            let names = std::iter::once(&host.container.name).chain(host.aliases.iter());
            for name in names {
                if !hosts.insert(name.to_ascii_lowercase()) {
                    return Err(invalid_config!("duplicate host name or alias {name}"));
                }
            }
        }
        if !self.hosts.is_empty() && !hosts.contains(&self.default_host.to_ascii_lowercase()) {
            return Err(invalid_config!(
                "default host {} is not configured",
                self.default_host
            ));
        }
        Ok(())
    }
}

impl HostConfig {
    fn validate(&self) -> Result<()> {
        if self.container.name.is_empty() {
            return Err(invalid_config!("host name must not be empty"));
        }
        let mut paths = HashSet::new();
        for context in &self.contexts {
            let path = &context.container.name;
            if !path.is_empty() && !path.starts_with('/') {
                return Err(invalid_config!(
                    "context path {path} must be empty or start with '/'"
                ));
            }
            if !paths.insert(path.as_str()) {
                return Err(invalid_config!(
                    "duplicate context {path} in host {}",
                    self.container.name
                ));
            }
            let mut wrappers = HashSet::new();
            for wrapper in &context.wrappers {
                if !wrappers.insert(wrapper.container.name.as_str()) {
                    return Err(invalid_config!(
                        "duplicate wrapper {} in context {path}",
                        wrapper.container.name
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::Error;

    #[test]
    fn endpoint_defaults_apply() {
        let config: EndpointConfig =
            serde_json::from_value(json!({"name": "http", "port": 8080})).unwrap();
        assert_eq!(config.backlog, DEFAULT_BACKLOG);
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(20)));
        assert!(config.tcp_no_delay);
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:8080");
        config.validate().unwrap();
    }

    #[test]
    fn worker_limits_are_validated() {
        let mut config = EndpointConfig::new("http", Ipv4Addr::LOCALHOST.into(), 0);
        config.max_workers = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.max_workers = -1;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.allow_unbounded_workers = true;
        config.validate().unwrap();

        config.allow_unbounded_workers = false;
        config.executor = Some("shared".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn executor_limits_are_validated() {
        let config: ExecutorConfig = serde_json::from_value(json!({"name": "shared"})).unwrap();
        config.validate().unwrap();

        for broken in [
            json!({"name": ""}),
            json!({"name": "shared", "max_threads": 0}),
            json!({"name": "shared", "max_queue_size": 0}),
            json!({"name": "shared", "max_idle_ms": 0}),
        ] {
            let config: ExecutorConfig = serde_json::from_value(broken).unwrap();
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
    }

    #[test]
    fn engine_tree_validation() {
        let config: EngineConfig = serde_json::from_value(json!({
            "name": "main",
            "default_host": "LOCALHOST",
            "hosts": [{
                "name": "localhost",
                "aliases": ["127.0.0.1"],
                "contexts": [{
                    "name": "/app",
                    "valves": [{"type": "access_log"}],
                    "wrappers": [{"name": "/echo", "handler": {"type": "echo"}}]
                }]
            }]
        }))
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.hosts[0].contexts[0].container.valves[0].kind, "access_log");

        let mut broken = config.clone();
        broken.default_host = "elsewhere".to_string();
        assert!(broken.validate().is_err());

        let mut broken = config.clone();
        broken.hosts[0].contexts[0].container.name = "app".to_string();
        assert!(broken.validate().is_err());

        let mut broken = config;
        broken.hosts[0].aliases.push("LocalHost".to_string());
        assert!(broken.validate().is_err());
    }
}
