//! DAC wire format
//!
//! Every datagram the DAC rebroadcasts has the same fixed layout:
//!
//! ```text
//! ┌────────────┬───────────┬───────────┬───────────┬───────────┐
//! │ RTP header │ channel 1 │ channel 2 │ channel 3 │ channel 4 │
//! │  12 bytes  │ 160 bytes │ 160 bytes │ 160 bytes │ 160 bytes │
//! └────────────┴───────────┴───────────┴───────────┴───────────┘
//! ```
//!
//! Header bytes:
//!
//! ```text
//!  0: V V P X C C C C    version, padding, extension, contributing source
//!  1: M T T T T T T T    marker, payload type
//!  2..4                  sequence number (big endian)
//!  4..8                  timestamp (big endian)
//!  8..12                 synchronization source (big endian)
//! ```

use bytes::Buf;
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// Size of the RTP header that precedes the channel payloads
pub const RTP_HEADER_SIZE: usize = 12;

/// Number of audio channels multiplexed into each packet
pub const DAC_CHANNELS: u8 = 4;

/// Bytes of audio per channel per packet (20ms of 8kHz 8-bit audio)
pub const DATA_PAYLOAD_SIZE: usize = 160;

/// Size of one complete multi-channel packet
pub const PACKET_SIZE: usize = RTP_HEADER_SIZE + DAC_CHANNELS as usize * DATA_PAYLOAD_SIZE;

/// Sequence numbers are 16 bits and wrap back to 0 after this many values
pub const MAX_SEQUENCE: u32 = 65536;

/// Distance from `MAX_SEQUENCE` at which a wrap-around is considered possible.
///
/// A range rather than the exact boundary, so a dropped 65535 does not make
/// the restarted sequence look late.
pub const WRAP_AROUND_RANGE: u32 = 1000;

/// Parsed RTP header of a DAC packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    /// Identifies the active audio source; sequence numbers are per source
    pub contributing_source: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub sync_source: u32,
}

impl PacketHeader {
    /// Read a header from the start of `buf`.
    pub fn parse(mut buf: &[u8]) -> Result<Self, NetworkError> {
        if buf.remaining() < RTP_HEADER_SIZE {
            return Err(NetworkError::PacketTooShort(buf.remaining()));
        }

        let flags = buf.get_u8();
        let marker_type = buf.get_u8();
        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let sync_source = buf.get_u32();

        Ok(Self {
            version: (flags & 0xC0) >> 6,
            padding: flags & 0x20 == 0x20,
            extension: flags & 0x10 == 0x10,
            contributing_source: flags & 0x0F,
            marker: marker_type & 0x80 == 0x80,
            payload_type: marker_type & 0x7F,
            sequence_number,
            timestamp,
            sync_source,
        })
    }

    /// Serialize the header into its 12 wire bytes.
    pub fn to_bytes(&self) -> [u8; RTP_HEADER_SIZE] {
        let mut out = [0u8; RTP_HEADER_SIZE];
        out[0] = (self.version & 0x03) << 6
            | u8::from(self.padding) << 5
            | u8::from(self.extension) << 4
            | (self.contributing_source & 0x0F);
        out[1] = u8::from(self.marker) << 7 | (self.payload_type & 0x7F);
        out[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.sync_source.to_be_bytes());
        out
    }
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            version: 2,
            padding: false,
            extension: false,
            contributing_source: 0,
            marker: false,
            payload_type: 0x79,
            sequence_number: 0,
            timestamp: 0,
            sync_source: 0,
        }
    }
}

/// Check that `channel` addresses one of the DAC channels.
pub fn validate_channel(channel: u8) -> Result<u8, NetworkError> {
    if channel == 0 || channel > DAC_CHANNELS {
        return Err(NetworkError::InvalidChannel {
            channel,
            max: DAC_CHANNELS,
        });
    }
    Ok(channel)
}

/// Output device information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_size() {
        assert_eq!(PACKET_SIZE, 652);
    }

    #[test]
    fn test_parse_header() {
        // Header as the DAC builds it: flags 0x80, marker/type 0x79
        let bytes = [
            0x83, 0x79, 0xFF, 0xFE, 0x00, 0x00, 0x01, 0x40, 0xDE, 0xAD, 0xBE, 0xEF,
        ];
        let header = PacketHeader::parse(&bytes).unwrap();

        assert_eq!(header.version, 2);
        assert!(!header.padding);
        assert!(!header.extension);
        assert_eq!(header.contributing_source, 3);
        assert!(!header.marker);
        assert_eq!(header.payload_type, 0x79);
        assert_eq!(header.sequence_number, 65534);
        assert_eq!(header.timestamp, 320);
        assert_eq!(header.sync_source, 0xDEAD_BEEF);
    }

    #[test]
    fn test_header_bytes_match_parse() {
        let header = PacketHeader {
            contributing_source: 9,
            marker: true,
            sequence_number: 1234,
            timestamp: 99,
            sync_source: 7,
            ..Default::default()
        };
        assert_eq!(PacketHeader::parse(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn test_short_header_rejected() {
        let result = PacketHeader::parse(&[0x80, 0x79, 0x00]);
        assert!(matches!(result, Err(NetworkError::PacketTooShort(3))));
    }

    #[test]
    fn test_validate_channel() {
        assert!(validate_channel(0).is_err());
        assert!(validate_channel(5).is_err());
        for channel in 1..=DAC_CHANNELS {
            assert_eq!(validate_channel(channel).unwrap(), channel);
        }
    }
}
