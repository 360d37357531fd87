//! Sandbox configuration
//!
//! Defaults come from [`BoxConfig::default`]; [`BoxConfig::from_env`]
//! overrides them from `KERNELBOX_*` environment variables.
//!
//! | Variable                         | Field               |
//! |----------------------------------|---------------------|
//! | `KERNELBOX_VERBOSE`              | `verbose`           |
//! | `KERNELBOX_SHOW_INFO`            | `show_info`         |
//! | `KERNELBOX_IMAGE`                | `image`             |
//! | `KERNELBOX_PORT`                 | `base_port`         |
//! | `KERNELBOX_RETRIES`              | `retries`           |
//! | `KERNELBOX_REQUEST_TIMEOUT_SECS` | `request_timeout`   |
//! | `KERNELBOX_READY_TIMEOUT_SECS`   | `readiness_timeout` |
//! | `KERNELBOX_STAGING_DIR`          | `staging_dir`       |
//! | `KERNELBOX_COMPRESSION`          | `compression`       |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::session::{SessionConfig, DEFAULT_RETRIES};
use crate::ws::ConnectionConfig;

/// Invalid value in an environment override
#[derive(Debug, thiserror::Error)]
#[error("invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: String,
    pub value: String,
}

/// Configuration for a kernel sandbox
#[derive(Debug, Clone)]
pub struct BoxConfig {
    /// Container image with Jupyter Kernel Gateway installed
    pub image: String,
    /// First host port to try for the gateway
    pub base_port: u16,
    /// Attempts per run before giving up on a dropped connection
    pub retries: u32,
    /// Budget for one execution attempt (None = wait forever)
    pub request_timeout: Option<Duration>,
    /// How long to wait for the gateway to answer after container start
    pub readiness_timeout: Duration,
    /// Local directory for uploads and downloads
    pub staging_dir: PathBuf,
    /// Largest accepted WebSocket message
    pub max_message_size: Option<usize>,
    /// Outgoing WebSocket frame size
    pub frame_size: usize,
    /// Offer permessage-deflate during the handshake
    pub compression: bool,
    /// Log submitted code and outputs at info level
    pub verbose: bool,
    /// Log sandbox lifecycle at info level
    pub show_info: bool,
}

impl Default for BoxConfig {
    fn default() -> Self {
        let connection = ConnectionConfig::default();
        Self {
            image: "codebox".to_string(),
            base_port: 8888,
            retries: DEFAULT_RETRIES,
            request_timeout: Some(Duration::from_secs(270)),
            readiness_timeout: Duration::from_secs(270),
            staging_dir: PathBuf::from(".codebox"),
            max_message_size: connection.max_message_size,
            frame_size: connection.frame_size,
            compression: true,
            verbose: false,
            show_info: true,
        }
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_num<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError {
        var: var.to_string(),
        value: value.to_string(),
    })
}

impl BoxConfig {
    /// Defaults overridden by `KERNELBOX_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("KERNELBOX_VERBOSE") {
            config.verbose = parse_bool("KERNELBOX_VERBOSE", &v)?;
        }
        if let Some(v) = lookup("KERNELBOX_SHOW_INFO") {
            config.show_info = parse_bool("KERNELBOX_SHOW_INFO", &v)?;
        }
        if let Some(v) = lookup("KERNELBOX_IMAGE") {
            config.image = v;
        }
        if let Some(v) = lookup("KERNELBOX_PORT") {
            config.base_port = parse_num("KERNELBOX_PORT", &v)?;
        }
        if let Some(v) = lookup("KERNELBOX_RETRIES") {
            config.retries = parse_num("KERNELBOX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("KERNELBOX_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_num("KERNELBOX_REQUEST_TIMEOUT_SECS", &v)?;
            // 0 disables the timeout
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(v) = lookup("KERNELBOX_READY_TIMEOUT_SECS") {
            config.readiness_timeout =
                Duration::from_secs(parse_num("KERNELBOX_READY_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("KERNELBOX_STAGING_DIR") {
            config.staging_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("KERNELBOX_COMPRESSION") {
            config.compression = parse_bool("KERNELBOX_COMPRESSION", &v)?;
        }

        Ok(config)
    }

    /// Session settings derived from this config
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            retries: self.retries,
            request_timeout: self.request_timeout,
            verbose: self.verbose,
        }
    }

    /// WebSocket settings derived from this config
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_message_size: self.max_message_size,
            frame_size: self.frame_size,
        }
    }
}
