//! Channel demultiplexing

use bytes::Bytes;

use crate::protocol::{DAC_CHANNELS, DATA_PAYLOAD_SIZE, RTP_HEADER_SIZE};

/// The per-channel audio carried by one accepted packet
#[derive(Debug, Clone, Default)]
pub struct ChannelFrame {
    pub sequence: u16,
    /// Chunks indexed by `channel - 1`; `None` if the packet was truncated
    chunks: [Option<Bytes>; DAC_CHANNELS as usize],
}

impl ChannelFrame {
    /// Audio for `channel` (1-based), if present in the packet.
    pub fn chunk(&self, channel: u8) -> Option<&Bytes> {
        let index = usize::from(channel).checked_sub(1)?;
        self.chunks.get(index)?.as_ref()
    }

    /// Number of channels that carried a complete chunk.
    pub fn channel_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }
}

/// Split a full packet into its channel chunks.
///
/// `packet` includes the header. Channels whose chunk is cut short by the end
/// of the datagram are left out.
pub fn demultiplex(packet: &[u8], sequence: u16) -> ChannelFrame {
    let mut frame = ChannelFrame {
        sequence,
        ..Default::default()
    };

    let payload = packet.get(RTP_HEADER_SIZE..).unwrap_or_default();
    for (slot, chunk) in frame
        .chunks
        .iter_mut()
        .zip(payload.chunks_exact(DATA_PAYLOAD_SIZE))
    {
        *slot = Some(Bytes::copy_from_slice(chunk));
    }

    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PACKET_SIZE;

    fn packet() -> Vec<u8> {
        let mut packet = vec![0u8; RTP_HEADER_SIZE];
        for channel in 1..=DAC_CHANNELS {
            packet.extend(std::iter::repeat(channel * 10).take(DATA_PAYLOAD_SIZE));
        }
        packet
    }

    #[test]
    fn test_full_packet_split() {
        let packet = packet();
        assert_eq!(packet.len(), PACKET_SIZE);

        let frame = demultiplex(&packet, 42);
        assert_eq!(frame.sequence, 42);
        assert_eq!(frame.channel_count(), 4);
        for channel in 1..=DAC_CHANNELS {
            let chunk = frame.chunk(channel).unwrap();
            assert_eq!(chunk.len(), DATA_PAYLOAD_SIZE);
            assert!(chunk.iter().all(|&b| b == channel * 10));
        }
    }

    #[test]
    fn test_truncated_packet() {
        let mut packet = packet();
        packet.truncate(RTP_HEADER_SIZE + 2 * DATA_PAYLOAD_SIZE + 10);

        let frame = demultiplex(&packet, 1);
        assert_eq!(frame.channel_count(), 2);
        assert!(frame.chunk(2).is_some());
        assert!(frame.chunk(3).is_none());
    }

    #[test]
    fn test_out_of_range_channel() {
        let frame = demultiplex(&packet(), 1);
        assert!(frame.chunk(0).is_none());
        assert!(frame.chunk(5).is_none());
    }
}
