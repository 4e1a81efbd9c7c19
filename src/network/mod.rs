//! Network subsystem for receiving DAC packets

pub mod demux;
pub mod receiver;
pub mod sequence;
pub mod stats;
pub mod udp;

pub use demux::{demultiplex, ChannelFrame};
pub use receiver::DacReceiver;
pub use sequence::{SequenceClass, SequenceValidator};
pub use stats::ReceiverStats;
pub use udp::create_socket;
