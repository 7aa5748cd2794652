/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::error::ChatError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Port of the line-based duplex chat.
pub const CHAT_PORT: u16 = 9000;
/// Port of the request/reply variant.
pub const REPLY_PORT: u16 = 8080;
/// Socket send/receive buffer size hint (1 MiB).
pub const DEFAULT_SOCKET_BUFFER_SIZE: u32 = 1 << 20;
/// Upper bound of a single inbound read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Socket tuning applied once before a session starts.
///
/// Every field is a hint. Failing to apply one is logged and ignored.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransportOptions {
    pub nodelay: bool,
    pub send_buffer_size: u32,
    pub recv_buffer_size: u32,
    pub reuse_address: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            send_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            recv_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            reuse_address: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ChatConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportOptions,
    /// Bounded receive timeout. Elapsing without data is not an error.
    pub read_timeout_ms: Option<u64>,
    pub read_buffer_size: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::with_port(CHAT_PORT)
    }
}

impl ChatConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port,
            transport: TransportOptions::default(),
            read_timeout_ms: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Load a YAML file. A file without `port` gets `default_port`.
    pub fn from_file(path: &str, default_port: u16) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content, default_port)
    }

    pub fn from_yaml(content: &str, default_port: u16) -> anyhow::Result<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(content)?;
        if value.is_null() {
            value = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }
        if let Some(map) = value.as_mapping_mut() {
            if !map.contains_key("port") {
                map.insert("port".into(), serde_yaml::Value::Number(default_port.into()));
            }
        }
        let config: ChatConfig = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_default(default_port: u16) -> anyhow::Result<Self> {
        if let Ok(config_path) = std::env::var("CHAT_CONFIG_PATH") {
            return Self::from_file(&config_path, default_port);
        }

        let mut config = Self::with_port(default_port);
        if let Ok(host) = std::env::var("CHAT_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("CHAT_PORT") {
            config.port = parse_env_value("CHAT_PORT", &port)?;
        }
        if let Ok(size) = std::env::var("CHAT_BUFFER_SIZE") {
            let size = parse_env_value("CHAT_BUFFER_SIZE", &size)?;
            config.transport.send_buffer_size = size;
            config.transport.recv_buffer_size = size;
        }
        if let Ok(nodelay) = std::env::var("CHAT_NODELAY") {
            config.transport.nodelay = parse_env_value("CHAT_NODELAY", &nodelay)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if self.read_buffer_size == 0 {
            return Err(ChatError::Config(
                "read_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves `host:port`, preferring the first address the resolver yields.
    pub fn endpoint(&self) -> Result<SocketAddr, ChatError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ChatError::Config(format!("invalid host {:?}: {e}", self.host)))?
            .next()
            .ok_or_else(|| ChatError::Config(format!("host {:?} resolved to nothing", self.host)))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_env_value<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid {name} {value:?}: {e}"))
}
