//! Error types for the DAC live-stream pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio output errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Output line is not open")]
    LineClosed,

    #[error("Playback thread failed: {0}")]
    Thread(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Ring buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The payload can never fit; retrying will not help.
    #[error("Payload of {len} bytes exceeds buffer capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("Buffer closed")]
    Closed,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to join multicast group {group}: {source}")]
    MulticastFailed {
        group: std::net::Ipv4Addr,
        #[source]
        source: std::io::Error,
    },

    #[error("Packet too short: {0} bytes")]
    PacketTooShort(usize),

    #[error("Invalid DAC channel {channel}: must be > 0 and <= {max}")]
    InvalidChannel { channel: u8, max: u8 },

    #[error("Receiver already started")]
    AlreadyStarted,

    #[error("Failed to spawn thread: {0}")]
    Spawn(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
