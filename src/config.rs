//! Configuration module for pingwatch.
//!
//! Loads the monitored servers and the global monitor settings from a JSON
//! file. A loaded [`Config`] is always validated.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("error parsing json configuration data: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid servers: no servers found in config")]
    NoServers,
    #[error("invalid servers: server #{index} is missing property {property}")]
    MissingServerProperty { index: usize, property: &'static str },
    #[error("invalid monitor settings: {name} must be {expected}, got {value}")]
    InvalidSetting {
        name: &'static str,
        expected: &'static str,
        value: i64,
    },
}

/// How a server is probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// One ICMP echo request.
    #[default]
    Icmp,
    /// One TCP connect to `port`.
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Icmp => f.write_str("icmp"),
            Protocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// A server entry as written in the config file.
///
/// `check_interval` and `timeout` are in seconds; absent or zero means
/// "inherit the global setting".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub check_interval: Option<u64>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Global monitor settings. Values are signed so that non-positive input
/// reaches validation instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    pub check_interval: i64,
    pub timeout: i64,
    pub max_connections: i64,
    /// Base of the notification backoff. Zero is allowed and means the
    /// delay between notifications is always one second.
    #[serde(default)]
    pub exponential_backoff_seconds: i64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: 10,
            timeout: 3,
            max_connections: 50,
            exponential_backoff_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub monitor: MonitorSettings,
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub servers: Vec<ServerEntry>,
    pub settings: Settings,
}

impl Config {
    /// Read and validate the config file at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&data)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.monitor.validate()?;

        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        for (index, server) in self.servers.iter().enumerate() {
            server.validate(index)?;
        }
        Ok(())
    }
}

impl MonitorSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("checkInterval", self.check_interval),
            ("timeout", self.timeout),
            ("maxConnections", self.max_connections),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(ConfigError::InvalidSetting {
                    name,
                    expected: "greater than zero",
                    value,
                });
            }
        }

        if self.exponential_backoff_seconds < 0 {
            return Err(ConfigError::InvalidSetting {
                name: "exponentialBackoffSeconds",
                expected: "zero or greater",
                value: self.exponential_backoff_seconds,
            });
        }
        Ok(())
    }
}

impl ServerEntry {
    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let missing = |property| ConfigError::MissingServerProperty { index, property };

        if self.name.trim().is_empty() {
            return Err(missing("name"));
        }
        if self.ip_address.trim().is_empty() {
            return Err(missing("ipAddress"));
        }
        if self.protocol == Protocol::Tcp && self.port.is_none() {
            return Err(missing("port"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID: &str = r#"{
        "servers": [
            { "name": "Local", "ipAddress": "127.0.0.1", "checkInterval": 2 },
            { "name": "Web", "ipAddress": "example.com", "protocol": "tcp", "port": 443, "timeout": 1 }
        ],
        "settings": {
            "monitor": {
                "checkInterval": 10,
                "timeout": 3,
                "maxConnections": 4,
                "exponentialBackoffSeconds": 0
            }
        }
    }"#;

    #[test]
    fn test_parse_valid_config() {
        let cfg = Config::from_json(VALID).unwrap();
        assert_eq!(cfg.servers.len(), 2);
        assert_eq!(cfg.servers[0].protocol, Protocol::Icmp);
        assert_eq!(cfg.servers[0].check_interval, Some(2));
        assert_eq!(cfg.servers[0].timeout, None);
        assert_eq!(cfg.servers[1].protocol, Protocol::Tcp);
        assert_eq!(cfg.servers[1].port, Some(443));
        assert_eq!(cfg.settings.monitor.max_connections, 4);
        assert_eq!(cfg.settings.monitor.exponential_backoff_seconds, 0);
    }

    #[test]
    fn test_from_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(VALID.as_bytes()).unwrap();
        let cfg = Config::from_file(tmp.path()).unwrap();
        assert_eq!(cfg.servers[1].name, "Web");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/pingwatch.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_json() {
        let err = Config::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_no_servers() {
        let json = r#"{ "servers": [], "settings": { "monitor": {
            "checkInterval": 1, "timeout": 1, "maxConnections": 1, "exponentialBackoffSeconds": 1 } } }"#;
        assert!(matches!(Config::from_json(json), Err(ConfigError::NoServers)));
    }

    #[test]
    fn test_missing_server_properties() {
        let mut cfg = Config::from_json(VALID).unwrap();
        cfg.servers[1].name = String::new();
        match cfg.validate() {
            Err(ConfigError::MissingServerProperty { index, property }) => {
                assert_eq!(index, 1);
                assert_eq!(property, "name");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let mut cfg = Config::from_json(VALID).unwrap();
        cfg.servers[0].ip_address = "  ".to_string();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MissingServerProperty { property: "ipAddress", .. })
        ));

        let mut cfg = Config::from_json(VALID).unwrap();
        cfg.servers[1].port = None;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MissingServerProperty { property: "port", .. })
        ));
    }

    #[test]
    fn test_invalid_monitor_settings() {
        let mut settings = MonitorSettings::default();
        assert!(settings.validate().is_ok());

        settings.max_connections = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidSetting { name: "maxConnections", .. })
        ));

        let mut settings = MonitorSettings::default();
        settings.timeout = -3;
        assert!(settings.validate().is_err());

        let mut settings = MonitorSettings::default();
        settings.exponential_backoff_seconds = 0;
        assert!(settings.validate().is_ok());
        settings.exponential_backoff_seconds = -1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_negative_server_interval_rejected_by_parser() {
        let json = VALID.replace("\"checkInterval\": 2", "\"checkInterval\": -2");
        assert!(matches!(Config::from_json(&json), Err(ConfigError::Parse(_))));
    }
}
