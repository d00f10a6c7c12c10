use crate::error::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// Configuration service
///
/// A string key/value store seeded from the process environment.
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// Create a service holding every variable of the process environment
    pub fn new() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    /// Create a service with no values, for tests and embedding
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    /// Parse the value under `key`. A missing key is `Ok(None)`.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| Error::Config {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        }
    }
}

/// What the process is deployed for. Development skips graceful draining.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnvironmentPurpose {
    Development,
    Testing,
    #[default]
    Production,
}

/// Bind and shutdown settings of a [`Server`](crate::server::Server).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_hostname: String,
    /// Multiplexed port; `0` picks an ephemeral port.
    pub port: u16,
    /// Extra plain-HTTP listener for the debug mux.
    pub http_port: Option<u16>,
    /// Extra plain-HTTP listener for the service router.
    pub gateway_port: Option<u16>,
    pub environment_purpose: EnvironmentPurpose,
    pub drain_timeout: Duration,
    pub health_check_timeout: Duration,
    pub sniff_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_hostname: "0.0.0.0".to_string(),
            port: 8080,
            http_port: None,
            gateway_port: None,
            environment_purpose: EnvironmentPurpose::Production,
            drain_timeout: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            sniff_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Read overrides from `config`; unset keys keep their defaults.
    pub fn from_config(config: &ConfigService) -> Result<Self> {
        let mut server = Self::default();
        if let Some(hostname) = config.get("LISTEN_HOSTNAME") {
            server.listen_hostname = hostname;
        }
        if let Some(port) = config.get_parsed("PORT")? {
            server.port = port;
        }
        server.http_port = config.get_parsed("HTTP_PORT")?;
        server.gateway_port = config.get_parsed("GATEWAY_PORT")?;
        if let Some(purpose) = config.get_parsed("ENVIRONMENT_PURPOSE")? {
            server.environment_purpose = purpose;
        }
        if let Some(secs) = config.get_parsed::<u64>("DRAIN_TIMEOUT_SECS")? {
            server.drain_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = config.get_parsed::<u64>("HEALTH_CHECK_TIMEOUT_SECS")? {
            server.health_check_timeout = Duration::from_secs(secs);
        }
        Ok(server)
    }

    /// Loopback on an ephemeral port, short timeouts. Used by tests and local tools.
    pub fn local() -> Self {
        Self {
            listen_hostname: "127.0.0.1".to_string(),
            port: 0,
            drain_timeout: Duration::from_millis(50),
            health_check_timeout: Duration::from_secs(1),
            sniff_timeout: Duration::from_secs(1),
            ..Self::default()
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment_purpose == EnvironmentPurpose::Development
    }

    pub fn listen_addr(&self) -> String {
        self.addr_for(self.port)
    }

    pub(crate) fn addr_for(&self, port: u16) -> String {
        format!("{}:{}", self.listen_hostname, port)
    }
}
