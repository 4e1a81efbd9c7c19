//! Application configuration
//!
//! Loaded from a TOML file; every field has a default so a partial (or
//! missing) file is fine.
//!
//! ```toml
//! [network]
//! udp_port = 5000
//! multicast_group = "239.255.86.75"
//!
//! [stream]
//! channel = 2
//! encoding = "mulaw"
//! ring_buffer_bytes = 4000
//!
//! [sequence]
//! resync_window_ms = 100
//! ```

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::line::Encoding;
use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::{validate_channel, DATA_PAYLOAD_SIZE};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub sequence: SequenceConfig,
}

/// Where and how to listen for DAC packets
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: Ipv4Addr,
    /// Join this group instead of receiving unicast
    #[serde(default)]
    pub multicast_group: Option<Ipv4Addr>,
    /// Interface for the multicast join (default interface when unset)
    #[serde(default)]
    pub multicast_interface: Option<Ipv4Addr>,
    /// Socket read timeout; upper bound on how long halt takes
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

/// A live stream of one channel to an output device
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Output device name; the default device when unset
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default = "default_ring_buffer_bytes")]
    pub ring_buffer_bytes: usize,
    /// Size of the device's own buffer, filled before playback starts
    #[serde(default = "default_device_buffer_bytes")]
    pub device_buffer_bytes: usize,
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
}

/// Packet ordering options
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SequenceConfig {
    /// Restart the sequencing when a second out-of-order packet arrives
    /// within this many milliseconds of the first. Disabled when unset.
    #[serde(default)]
    pub resync_window_ms: Option<u64>,
}

fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}

fn default_bind_address() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_recv_timeout_ms() -> u64 {
    DEFAULT_RECV_TIMEOUT_MS
}

fn default_stats_interval_secs() -> u64 {
    DEFAULT_STATS_INTERVAL_SECS
}

fn default_channel() -> u8 {
    1
}

fn default_ring_buffer_bytes() -> usize {
    DEFAULT_RING_BUFFER_BYTES
}

fn default_device_buffer_bytes() -> usize {
    DEFAULT_DEVICE_BUFFER_BYTES
}

fn default_idle_sleep_ms() -> u64 {
    PACKET_INTERVAL_MS
}

fn default_max_restart_attempts() -> u32 {
    MAX_RESTART_ATTEMPTS
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            udp_port: default_udp_port(),
            bind_address: default_bind_address(),
            multicast_group: None,
            multicast_interface: None,
            recv_timeout_ms: default_recv_timeout_ms(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            device: None,
            encoding: Encoding::default(),
            ring_buffer_bytes: default_ring_buffer_bytes(),
            device_buffer_bytes: default_device_buffer_bytes(),
            idle_sleep_ms: default_idle_sleep_ms(),
            max_restart_attempts: default_max_restart_attempts(),
        }
    }
}

impl StreamConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

impl SequenceConfig {
    pub fn resync_window(&self) -> Option<Duration> {
        self.resync_window_ms.map(Duration::from_millis)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file at the default location yields the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `config.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "dac-live-stream")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        validate_channel(self.stream.channel)?;

        if self.stream.ring_buffer_bytes < DATA_PAYLOAD_SIZE {
            return Err(Error::Config(format!(
                "ring_buffer_bytes must hold at least one packet ({} bytes), got {}",
                DATA_PAYLOAD_SIZE, self.stream.ring_buffer_bytes
            )));
        }
        if self.stream.device_buffer_bytes < DATA_PAYLOAD_SIZE {
            return Err(Error::Config(format!(
                "device_buffer_bytes must hold at least one packet ({} bytes), got {}",
                DATA_PAYLOAD_SIZE, self.stream.device_buffer_bytes
            )));
        }
        if self.stream.max_restart_attempts == 0 {
            return Err(Error::Config("max_restart_attempts must be > 0".into()));
        }
        Ok(())
    }
}
