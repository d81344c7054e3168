//! # Configuration
//!
//! TOML configuration for the link and its resilience machinery. Every section
//! and every key is optional; missing values take the defaults listed below.
//!
//! ```toml
//! [link]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! byte_size = 8
//! parity = "N"
//! stop_bits = 1.0
//! read_timeout_ms = 100
//! write_timeout_ms = 1000
//!
//! [breaker]
//! failure_threshold = 5
//! recovery_timeout_secs = 30
//!
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 100
//! backoff_factor = 2.0
//! max_delay_ms = 60000
//!
//! [monitor]
//! health_interval_ms = 2000
//! stats_interval_ms = 1000
//!
//! [logging]
//! level = "info"
//! file = "serialkeeper.log"
//! ```
//!
//! Port settings are kept as plain strings and numbers here and only become a
//! [`ConnectionParams`] through [`LinkConfig::to_params`], which validates them.
//!
//! ```rust,no_run
//! use serialkeeper::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("serialkeeper.toml").await?;
//!     let params = config.link.to_params()?;
//!     println!("{}", params);
//!     Ok(())
//! }
//! ```

use std::io;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::ParamError;
use crate::link::{LinkSettings, ReaderSettings};
use crate::params::{ConnectionParams, FlowControl, Parity, StopBits};
use crate::resilience::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub send: SendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    pub byte_size: u8,
    /// One of `N`, `E`, `O`, `M`, `S`.
    pub parity: String,
    /// 1, 1.5 or 2.
    pub stop_bits: f32,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub xonxoff: bool,
    pub rtscts: bool,
    pub dsrdtr: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: 115200,
            byte_size: 8,
            parity: "N".to_string(),
            stop_bits: 1.0,
            read_timeout_ms: 100,
            write_timeout_ms: 1000,
            xonxoff: false,
            rtscts: false,
            dsrdtr: false,
        }
    }
}

#[cfg(windows)]
fn default_port() -> String {
    "COM3".to_string()
}

#[cfg(not(windows))]
fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

impl LinkConfig {
    /// Convert to validated connection parameters.
    pub fn to_params(&self) -> Result<ConnectionParams, ParamError> {
        let params = ConnectionParams {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            byte_size: self.byte_size,
            parity: Parity::from_code(&self.parity)?,
            stop_bits: StopBits::from_value(self.stop_bits)?,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            flow_control: FlowControl {
                xon_xoff: self.xonxoff,
                rts_cts: self.rtscts,
                dsr_dtr: self.dsrdtr,
            },
        };
        params.validate()?;
        Ok(params)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
        }
    }
}

/// Backoff for port enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub poll_interval_ms: u64,
    pub max_consecutive_errors: u32,
    pub error_backoff_step_ms: u64,
    pub max_error_backoff_ms: u64,
    pub removal_pause_ms: u64,
    pub read_chunk_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            max_consecutive_errors: 5,
            error_backoff_step_ms: 100,
            max_error_backoff_ms: 5000,
            removal_pause_ms: 50,
            read_chunk_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub health_interval_ms: u64,
    pub stats_interval_ms: u64,
    /// Time a stopping reader gets before it is aborted.
    pub stop_grace_ms: u64,
    pub force_stop_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_interval_ms: 2000,
            stats_interval_ms: 1000,
            stop_grace_ms: 3000,
            force_stop_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    pub max_payload_bytes: usize,
    pub write_chunk_bytes: usize,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 64 * 1024,
            write_chunk_bytes: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        Self::parse(path, &content)
    }

    /// Like [`Config::load`], but a file that does not exist is `Ok(None)`.
    /// Unreadable or malformed files are still errors.
    pub async fn load_if_present(path: &str) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(anyhow!("Failed to read config file {}: {}", path, e)),
        };
        Self::parse(path, &content).map(Some)
    }

    fn parse(path: &str, content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))
    }

    /// Write the default configuration to `path`.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config {
            logging: LoggingConfig {
                file: Some("serialkeeper.log".to_string()),
                ..LoggingConfig::default()
            },
            ..Config::default()
        };
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Manager settings described by this configuration.
    pub fn settings(&self) -> LinkSettings {
        let ms = Duration::from_millis;
        LinkSettings {
            reader: ReaderSettings {
                poll_interval: ms(self.reader.poll_interval_ms),
                max_consecutive_errors: self.reader.max_consecutive_errors.max(1),
                error_backoff_step: ms(self.reader.error_backoff_step_ms),
                max_error_backoff: ms(self.reader.max_error_backoff_ms),
                removal_pause: ms(self.reader.removal_pause_ms),
                read_chunk_size: self.reader.read_chunk_size.max(1),
            },
            breaker_threshold: self.breaker.failure_threshold,
            breaker_recovery: Duration::from_secs(self.breaker.recovery_timeout_secs),
            enumeration_retry: RetryPolicy {
                max_retries: self.retry.max_retries,
                initial_delay: ms(self.retry.initial_delay_ms),
                backoff_factor: self.retry.backoff_factor,
                max_delay: ms(self.retry.max_delay_ms),
            },
            health_interval: ms(self.monitor.health_interval_ms),
            stats_interval: ms(self.monitor.stats_interval_ms),
            stop_grace: ms(self.monitor.stop_grace_ms),
            force_stop: ms(self.monitor.force_stop_ms),
            max_payload: self.send.max_payload_bytes,
            write_chunk: self.send.write_chunk_bytes.max(1),
        }
    }
}
