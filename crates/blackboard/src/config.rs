// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry and network client configuration.
//!
//! Both config types are plain structs with sensible defaults:
//!
//! ```
//! use blackboard::config::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig {
//!     connect_timeout: Duration::from_secs(2),
//!     nodelay: true,
//!     ..Default::default()
//! };
//! ```
//!
//! ## Environment overrides
//! - `BB_DEFAULT_OWNER`: owner recorded for handles opened without one
//! - `BB_MAX_INTERFACES`: registry size limit (0 = unlimited)
//! - `BB_CONNECT_TIMEOUT_MS`: TCP connect timeout
//! - `BB_HANDSHAKE_TIMEOUT_MS`: hello exchange timeout (0 = wait until interrupted)
//! - `BB_WAIT_TIMEOUT_MS`: `enqueue_and_wait` timeout (0 = unbounded)
//! - `BB_MAX_PAYLOAD_SIZE`: largest accepted frame payload in bytes

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable names
pub const ENV_DEFAULT_OWNER: &str = "BB_DEFAULT_OWNER";
pub const ENV_MAX_INTERFACES: &str = "BB_MAX_INTERFACES";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "BB_CONNECT_TIMEOUT_MS";
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "BB_HANDSHAKE_TIMEOUT_MS";
pub const ENV_WAIT_TIMEOUT_MS: &str = "BB_WAIT_TIMEOUT_MS";
pub const ENV_MAX_PAYLOAD_SIZE: &str = "BB_MAX_PAYLOAD_SIZE";

/// Default frame payload limit (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Registry configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlackBoardConfig {
    /// Maximum number of live interface instances (0 = unlimited)
    pub max_interfaces: usize,

    /// Owner recorded for handles opened without an explicit owner
    pub default_owner: String,
}

impl Default for BlackBoardConfig {
    fn default() -> Self {
        Self {
            max_interfaces: 0,
            default_owner: String::from("anonymous"),
        }
    }
}

impl BlackBoardConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(owner) = env_string(ENV_DEFAULT_OWNER) {
            config.default_owner = owner;
        }
        if let Some(max) = env_parse::<usize>(ENV_MAX_INTERFACES)? {
            config.max_interfaces = max;
        }
        Ok(config)
    }
}

/// Network client configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    // === Connection ===
    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// Hello exchange timeout (None = wait until established or interrupted)
    pub handshake_timeout: Option<Duration>,

    /// Disable Nagle's algorithm
    pub nodelay: bool,

    /// TCP keep-alive interval (None = disabled)
    pub keepalive: Option<Duration>,

    // === Framing ===
    /// Largest accepted payload; larger frames kill the session
    pub max_payload_size: usize,

    // === Threads ===
    /// Read timeout used by the receiver thread to notice shutdown
    pub recv_poll_interval: Duration,

    /// Timeout of `enqueue_and_wait` (None = unbounded)
    pub wait_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Some(Duration::from_secs(5)),
            nodelay: true,
            keepalive: Some(Duration::from_secs(30)),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            recv_poll_interval: Duration::from_millis(50),
            wait_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = env_parse::<u64>(ENV_CONNECT_TIMEOUT_MS)? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>(ENV_HANDSHAKE_TIMEOUT_MS)? {
            config.handshake_timeout = optional_ms(ms);
        }
        if let Some(ms) = env_parse::<u64>(ENV_WAIT_TIMEOUT_MS)? {
            config.wait_timeout = optional_ms(ms);
        }
        if let Some(size) = env_parse::<usize>(ENV_MAX_PAYLOAD_SIZE)? {
            config.max_payload_size = size;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values the client cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 || self.max_payload_size > u32::MAX as usize {
            return Err(Error::Config(format!(
                "max_payload_size must be within 1..={}",
                u32::MAX
            )));
        }
        if self.recv_poll_interval.is_zero() {
            return Err(Error::Config("recv_poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

fn optional_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        Some(raw) => parse_value(name, &raw).map(Some),
        None => Ok(None),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("invalid value for {}: {:?}", name, raw)))
}

// ============================================================================
// YAML loading
// ============================================================================

#[cfg(feature = "config-loaders")]
pub use yaml::{YamlBlackBoard, YamlClient, YamlConfigDocument};

#[cfg(feature = "config-loaders")]
mod yaml {
    //! ```yaml
    //! blackboard:
    //!   max_interfaces: 64
    //!   default_owner: laser-driver
    //! client:
    //!   connect_timeout_ms: 2000
    //!   handshake_timeout_ms: 0   # wait until interrupted
    //!   max_payload_size: 65536
    //! ```

    use super::{optional_ms, BlackBoardConfig, ClientConfig};
    use crate::error::{Error, Result};
    use serde::Deserialize;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    /// Root YAML document.
    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    pub struct YamlConfigDocument {
        pub blackboard: YamlBlackBoard,
        pub client: YamlClient,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    pub struct YamlBlackBoard {
        pub max_interfaces: Option<usize>,
        pub default_owner: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    pub struct YamlClient {
        pub connect_timeout_ms: Option<u64>,
        pub handshake_timeout_ms: Option<u64>,
        pub wait_timeout_ms: Option<u64>,
        pub recv_poll_interval_ms: Option<u64>,
        pub max_payload_size: Option<usize>,
        pub nodelay: Option<bool>,
        pub keepalive_ms: Option<u64>,
    }

    impl YamlConfigDocument {
        pub fn parse(yaml_content: &str) -> Result<Self> {
            serde_yaml::from_str(yaml_content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML: {}", e)))
        }

        pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
            let yaml_content = fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Failed to read YAML file: {}", e)))?;
            Self::parse(&yaml_content)
        }

        pub fn blackboard_config(&self) -> BlackBoardConfig {
            let mut config = BlackBoardConfig::default();
            if let Some(max) = self.blackboard.max_interfaces {
                config.max_interfaces = max;
            }
            if let Some(owner) = &self.blackboard.default_owner {
                config.default_owner = owner.clone();
            }
            config
        }

        pub fn client_config(&self) -> Result<ClientConfig> {
            let c = &self.client;
            let mut config = ClientConfig::default();
            if let Some(ms) = c.connect_timeout_ms {
                config.connect_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = c.handshake_timeout_ms {
                config.handshake_timeout = optional_ms(ms);
            }
            if let Some(ms) = c.wait_timeout_ms {
                config.wait_timeout = optional_ms(ms);
            }
            if let Some(ms) = c.recv_poll_interval_ms {
                config.recv_poll_interval = Duration::from_millis(ms);
            }
            if let Some(size) = c.max_payload_size {
                config.max_payload_size = size;
            }
            if let Some(nodelay) = c.nodelay {
                config.nodelay = nodelay;
            }
            if let Some(ms) = c.keepalive_ms {
                config.keepalive = optional_ms(ms);
            }
            config.validate()?;
            Ok(config)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let bb = BlackBoardConfig::default();
        assert_eq!(bb.max_interfaces, 0);
        let client = ClientConfig::default();
        assert!(client.validate().is_ok());
        assert_eq!(client.max_payload_size, DEFAULT_MAX_PAYLOAD_SIZE);
        assert!(client.wait_timeout.is_none());
    }

    #[test]
    fn test_struct_update() {
        let client = ClientConfig {
            handshake_timeout: None,
            ..Default::default()
        };
        assert!(client.handshake_timeout.is_none());
        assert!(client.nodelay);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u64>("X", " 250 ").unwrap(), 250);
        assert!(matches!(
            parse_value::<u64>("X", "soon"),
            Err(Error::Config(msg)) if msg.contains("X")
        ));
    }

    #[test]
    fn test_validate_rejects_zero_poll() {
        let client = ClientConfig {
            recv_poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(client.validate().is_err());
    }

    #[test]
    fn test_optional_ms() {
        assert_eq!(optional_ms(0), None);
        assert_eq!(optional_ms(15), Some(Duration::from_millis(15)));
    }
}
