//! # DAC Live Stream
//!
//! Real-time reception of DAC audio over UDP and live playback of one channel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                                 DAC                                  │
//! │        Packets: [RTP header | ch1 | ch2 | ch3 | ch4]  over UDP       │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │              DacReceiver (network::receiver) - own thread            │
//! │   PacketHeader::parse → SequenceValidator → demultiplex              │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    │ ChannelFrame (FIFO queue)
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │           OrderedNotifier (subscribers::notifier) - one worker       │
//! │           SubscriberRegistry: chunk for channel N → listeners of N   │
//! └───────────┬──────────────────────────────────────────┬───────────────┘
//!             ▼                                          ▼
//! ┌─────────────────────────────┐          ┌─────────────────────────────┐
//! │ LiveStreamer (channel 1)    │          │ LiveStreamer (channel 3)    │
//! │  ┌───────────────────────┐  │          │  ┌───────────────────────┐  │
//! │  │ RingBuffer            │  │          │  │ RingBuffer            │  │
//! │  └──────────┬────────────┘  │          │  └──────────┬────────────┘  │
//! │             ▼               │          │             ▼               │
//! │  ┌───────────────────────┐  │          │  ┌───────────────────────┐  │
//! │  │ Writer thread         │  │          │  │ Writer thread         │  │
//! │  │ warm-up / play / retry│  │          │  │ warm-up / play / retry│  │
//! │  └──────────┬────────────┘  │          │  └──────────┬────────────┘  │
//! └─────────────┼───────────────┘          └─────────────┼───────────────┘
//!               ▼                                        ▼
//!         OutputLine                               OutputLine
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod subscribers;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of the DAC audio
    pub const SAMPLE_RATE: u32 = 8000;

    /// Default UDP port the DAC rebroadcasts to
    pub const DEFAULT_UDP_PORT: u16 = 5000;

    /// How often the receive loop wakes to check for a halt request
    pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 250;

    /// Interval between packet throughput log lines
    pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

    /// Ring buffer size per live stream (500ms of audio)
    pub const DEFAULT_RING_BUFFER_BYTES: usize = 4000;

    /// Output device buffer size (500ms of audio)
    pub const DEFAULT_DEVICE_BUFFER_BYTES: usize = 4000;

    /// Packet cadence of the DAC; also the playback idle sleep
    pub const PACKET_INTERVAL_MS: u64 = 20;

    /// Device errors tolerated before a live stream gives up
    pub const MAX_RESTART_ATTEMPTS: u32 = 3;
}
