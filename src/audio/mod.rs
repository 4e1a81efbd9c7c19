//! Audio output subsystem

pub mod buffer;
#[cfg(feature = "playback")]
pub mod device;
pub mod line;
pub mod playback;

pub use buffer::{RingBuffer, SharedRingBuffer};
#[cfg(feature = "playback")]
pub use device::{find_output_device, list_output_devices, CpalOutputLine};
pub use line::{AudioFormat, Encoding, OutputLine};
pub use playback::{LiveStreamer, LiveStreamerBuilder, PlaybackListener, StreamEvent, StreamState};
