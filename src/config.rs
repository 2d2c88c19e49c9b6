//! Configuration for the padstream daemon
//!
//! Loaded from a TOML file. Every section and field has a default, so a file
//! only needs the values it changes and an absent file means all defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub link: LinkConfig,
    pub input: InputConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

/// Control/data channel sockets and session limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to listen on (`0.0.0.0` for all)
    pub bind_address: IpAddr,
    /// TCP control port; the UDP data socket is bound to the same port
    pub control_port: u16,
    /// Concurrent control clients. Extra connections are closed on accept.
    pub max_sessions: usize,
    /// Silence allowed before a session is dropped, also announced to clients
    pub heartbeat_timeout_secs: u32,
    /// Longest wait between loop iterations while the link is up
    pub idle_timeout_ms: u64,
    /// Wait between loop iterations while the link is down
    pub link_down_timeout_ms: u64,
    /// Minimum spacing between attempts to rebind after a failed one
    pub rebind_retry_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            control_port: 5000,
            max_sessions: 1,
            heartbeat_timeout_secs: 25,
            idle_timeout_ms: 100,
            link_down_timeout_ms: 1000,
            rebind_retry_ms: 1000,
        }
    }
}

impl NetworkConfig {
    #[inline]
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.control_port)
    }

    #[inline]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs as u64)
    }

    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[inline]
    pub fn link_down_timeout(&self) -> Duration {
        Duration::from_millis(self.link_down_timeout_ms)
    }

    #[inline]
    pub fn rebind_retry(&self) -> Duration {
        Duration::from_millis(self.rebind_retry_ms)
    }
}

/// Link watcher
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    /// When false the link is reported up once and never changes
    pub probe_enabled: bool,
    /// Address the OS must have a route to for the link to count as up.
    /// No traffic is sent to it.
    pub probe_address: SocketAddr,
    pub probe_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            probe_enabled: true,
            probe_address: SocketAddr::from(([192, 0, 2, 1], 9)),
            probe_interval_ms: 1000,
        }
    }
}

impl LinkConfig {
    #[inline]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Input sampling
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InputConfig {
    /// Input provider (`mock`)
    pub source: String,
    /// Seed for simulated sources, 0 = random each run
    pub random_seed: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            source: "mock".to_string(),
            random_seed: 0,
        }
    }
}

/// Battery / charger / Wi-Fi sampling
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Status provider (`sysfs` or `mock`)
    pub source: String,
    pub interval_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            source: "sysfs".to_string(),
            interval_ms: 1000,
        }
    }
}

impl StatusConfig {
    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use padstream::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("padstream.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        let net = &self.network;
        let checks = [
            (net.control_port == 0, "network.control_port must be nonzero"),
            (net.max_sessions == 0, "network.max_sessions must be at least 1"),
            (
                net.heartbeat_timeout_secs == 0,
                "network.heartbeat_timeout_secs must be nonzero",
            ),
            (net.idle_timeout_ms == 0, "network.idle_timeout_ms must be nonzero"),
            (
                net.link_down_timeout_ms == 0,
                "network.link_down_timeout_ms must be nonzero",
            ),
            (
                self.link.probe_interval_ms == 0,
                "link.probe_interval_ms must be nonzero",
            ),
            (self.status.interval_ms == 0, "status.interval_ms must be nonzero"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(Error::InvalidConfig(msg.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.network.control_port, 5000);
        assert_eq!(config.network.max_sessions, 1);
        assert_eq!(config.network.heartbeat_timeout(), Duration::from_secs(25));
        assert_eq!(config.network.idle_timeout(), Duration::from_millis(100));
        assert_eq!(
            config.network.control_addr(),
            "0.0.0.0:5000".parse::<SocketAddr>().unwrap()
        );
        assert!(config.link.probe_enabled);
        assert_eq!(config.input.source, "mock");
        assert_eq!(config.status.source, "sysfs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_serialization() {
        let config = AppConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[network]"));
        assert!(toml_string.contains("[link]"));
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("control_port = 5000"));
        assert!(toml_string.contains("probe_address = \"192.0.2.1:9\""));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_content = r#"
[network]
control_port = 6000
max_sessions = 4

[status]
source = "mock"

[logging]
level = "debug"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.network.control_port, 6000);
        assert_eq!(config.network.max_sessions, 4);
        assert_eq!(config.network.heartbeat_timeout_secs, 25);
        assert_eq!(config.status.source, "mock");
        assert_eq!(config.status.interval_ms, 1000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.link.probe_enabled);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = AppConfig::default();
        config.network.max_sessions = 0;
        match config.validate() {
            Err(Error::InvalidConfig(msg)) => assert!(msg.contains("max_sessions")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_file_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("padstream-config-{}.toml", std::process::id()));
        let mut config = AppConfig::default();
        config.network.control_port = 5123;
        config.to_file(&path).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded.network.control_port, 5123);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let path = std::env::temp_dir().join(format!("padstream-bad-{}.toml", std::process::id()));
        fs::write(&path, "[network\ncontrol_port = ").unwrap();
        assert!(matches!(AppConfig::from_file(&path), Err(Error::ConfigParse(_))));
        fs::remove_file(&path).unwrap();
    }
}
