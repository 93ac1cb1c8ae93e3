//! The configuration file format of the server binary.
use std::{fs::File, io::Read, path::Path};

use culvert_core::config::{ComponentConfig, EndpointConfig, EngineConfig, ExecutorConfig};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

// config files larger than this are refused
const MAX_CONFIG_FILE_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub executors: Vec<ExecutorConfig>,
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "culvert".to_string()
}

/// An endpoint plus the connection handler it feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
    pub handler: ComponentConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| anyhow::anyhow!("unable to open {}: {e}", path.display()))?;
        let mut content = Vec::new();
        file.take(MAX_CONFIG_FILE_SIZE + 1).read_to_end(&mut content)?;
        if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
            anyhow::bail!(
                "config file {} exceeds {MAX_CONFIG_FILE_SIZE} bytes",
                path.display()
            );
        }
        Self::from_slice(&content)
    }

    pub fn from_slice(content: &[u8]) -> anyhow::Result<Self> {
        let config: Config = parse_from_slice(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for executor in &self.executors {
            executor.validate()?;
        }
        for connector in &self.connectors {
            connector.endpoint.validate()?;
            if let Some(name) = &connector.endpoint.executor {
                if !self.executors.iter().any(|e| &e.name == name) {
                    anyhow::bail!(
                        "connector {} refers to unknown executor {name}",
                        connector.endpoint.name
                    );
                }
            }
        }
        self.engine.validate()?;
        Ok(())
    }
}

pub fn parse_from_slice<T: DeserializeOwned>(content: &[u8]) -> anyhow::Result<T> {
    // read first non-space u8
    let is_json = match content
        .iter()
        .find(|&&b| b != b' ' && b != b'\r' && b != b'\n' && b != b'\t')
    {
        Some(first) => *first == b'{',
        None => false,
    };
    match is_json {
        true => serde_json::from_slice::<T>(content).map_err(Into::into),
        false => toml::from_str::<T>(&String::from_utf8_lossy(content)).map_err(Into::into),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TOML_CONFIG: &str = r#"
[service]
name = "demo"

[[executors]]
name = "shared"
max_threads = 16
min_spare_threads = 2

[[connectors]]
name = "http"
address = "127.0.0.1"
port = 0
executor = "shared"
max_workers = -1
handler = { type = "http", params = { server = "culvert" } }

[engine]
name = "main"
default_host = "localhost"

[[engine.valves]]
type = "access_log"

[[engine.hosts]]
name = "localhost"
aliases = ["127.0.0.1"]
error_report_valve = "error_report"

[[engine.hosts.contexts]]
name = "/app"

[[engine.hosts.contexts.wrappers]]
name = ""
handler = { type = "echo" }

[[engine.hosts.contexts.wrappers]]
name = "/status"
handler = { type = "status" }
"#;

    #[test]
    fn parses_toml() {
        let config = Config::from_slice(TOML_CONFIG.as_bytes()).unwrap();
        assert_eq!(config.service.name, "demo");
        assert_eq!(config.executors[0].max_threads, 16);
        let connector = &config.connectors[0];
        assert_eq!(connector.endpoint.executor.as_deref(), Some("shared"));
        assert_eq!(connector.handler.kind, "http");
        assert_eq!(connector.handler.params["server"], "culvert");

        let host = &config.engine.hosts[0];
        assert_eq!(host.error_report_valve.as_deref(), Some("error_report"));
        assert_eq!(host.contexts[0].wrappers[1].handler.kind, "status");
        assert_eq!(config.engine.container.valves[0].kind, "access_log");
    }

    #[test]
    fn parses_json_and_validates() {
        let json = r#"
            {
                "connectors": [
                    {"name": "echo", "port": 7000, "handler": {"type": "echo"}}
                ],
                "engine": {"name": "main", "default_host": "localhost"}
            }
        "#;
        let config = Config::from_slice(json.as_bytes()).unwrap();
        assert_eq!(config.service.name, "culvert");
        assert_eq!(config.connectors[0].endpoint.port, 7000);

        let bad = r#"
            {
                "connectors": [
                    {"name": "echo", "port": 7000, "executor": "nope", "handler": {"type": "echo"}}
                ],
                "engine": {"name": "main", "default_host": "localhost"}
            }
        "#;
        let err = Config::from_slice(bad.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unknown executor nope"));
    }
}
