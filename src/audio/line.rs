//! Output line abstraction
//!
//! An output line is a playback device with its own internal byte buffer:
//! bytes written are queued until the device clock consumes them. The live
//! streamer only ever talks to this trait, so any backend (a sound card, a
//! file, a test double) can sit behind it.

use serde::{Deserialize, Serialize};

use crate::constants::SAMPLE_RATE;
use crate::error::AudioError;

/// 8-bit sample encoding of the audio bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// G.711 µ-law, as sent by the DAC
    #[default]
    Mulaw,
    /// Unsigned linear PCM, 0x80 is silence
    Pcm8,
}

impl Encoding {
    /// The byte that encodes a zero sample
    pub fn silence(self) -> u8 {
        match self {
            Encoding::Mulaw => 0xFF,
            Encoding::Pcm8 => 0x80,
        }
    }

    /// Expand one encoded byte to a sample in [-1.0, 1.0].
    pub fn to_f32(self, byte: u8) -> f32 {
        match self {
            Encoding::Mulaw => f32::from(mulaw_to_linear(byte)) / 32768.0,
            Encoding::Pcm8 => (f32::from(byte) - 128.0) / 128.0,
        }
    }
}

/// G.711 µ-law expansion to 16-bit linear
fn mulaw_to_linear(byte: u8) -> i16 {
    const BIAS: i16 = 0x84;
    let byte = !byte;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = i16::from(byte & 0x0F);
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if byte & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Format the line is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub encoding: Encoding,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// 8kHz, 8-bit, mono: what the DAC produces
    pub fn dac(encoding: Encoding) -> Self {
        Self {
            encoding,
            sample_rate: SAMPLE_RATE,
            channels: 1,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::dac(Encoding::default())
    }
}

/// A playback device with an internal buffer.
///
/// Lines are created and used on the writer thread only, so implementations
/// need not be `Send`.
pub trait OutputLine {
    /// Acquire the device. Playback does not begin until [`start`](Self::start).
    fn open(&mut self, format: &AudioFormat) -> Result<(), AudioError>;

    /// Queue bytes; returns how many were accepted (at most `available()`).
    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError>;

    /// Free space in the internal buffer, in bytes.
    fn available(&self) -> usize;

    /// Total size of the internal buffer, in bytes.
    fn buffer_size(&self) -> usize;

    /// Start the device clock.
    fn start(&mut self) -> Result<(), AudioError>;

    /// Release the device and discard anything queued.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_zero() {
        assert_eq!(Encoding::Mulaw.to_f32(Encoding::Mulaw.silence()), 0.0);
        assert_eq!(Encoding::Pcm8.to_f32(Encoding::Pcm8.silence()), 0.0);
    }

    #[test]
    fn test_mulaw_extremes() {
        assert_eq!(mulaw_to_linear(0x00), -32124);
        assert_eq!(mulaw_to_linear(0x80), 32124);
        assert_eq!(mulaw_to_linear(0x7F), 0);
        assert!(Encoding::Mulaw.to_f32(0x80) <= 1.0);
        assert!(Encoding::Mulaw.to_f32(0x00) >= -1.0);
    }

    #[test]
    fn test_pcm8_range() {
        assert_eq!(Encoding::Pcm8.to_f32(0), -1.0);
        assert!(Encoding::Pcm8.to_f32(255) < 1.0);
    }

    #[test]
    fn test_dac_format() {
        let format = AudioFormat::default();
        assert_eq!(format.sample_rate, 8000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.encoding, Encoding::Mulaw);
    }
}
