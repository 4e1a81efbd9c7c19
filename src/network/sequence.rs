//! Packet ordering validation
//!
//! Tracks the last accepted sequence number per contributing source and
//! classifies every new packet. Lost packets are tolerated (the stream
//! resynchronises on a forward jump), while duplicates and late packets are
//! rejected so stale audio is never replayed.

use std::time::{Duration, Instant};

use crate::protocol::{MAX_SEQUENCE, WRAP_AROUND_RANGE};

/// How a packet relates to the previously accepted one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceClass {
    /// First packet seen from this source
    First,
    /// Exactly one past the previous packet
    InOrder,
    /// Same sequence number as the previous packet
    Duplicate,
    /// Older than the previous packet
    Late,
    /// Skips ahead; packets in between were lost
    Early,
    /// The 16-bit counter rolled over
    WrapAround,
    /// Out-of-order packets kept arriving, sequencing restarted from this one
    Resync,
}

impl SequenceClass {
    /// Whether the packet should be forwarded to subscribers.
    pub fn is_accepted(self) -> bool {
        !matches!(self, SequenceClass::Duplicate | SequenceClass::Late)
    }
}

/// Per-connection sequence tracking state
#[derive(Debug)]
pub struct SequenceValidator {
    last_sequence: Option<u16>,
    last_source: Option<u8>,
    potential_wrap_around: bool,
    /// Resynchronise on a second rejection within this window (None disables)
    resync_window: Option<Duration>,
    /// Arrival time of the first rejected packet since the last accept
    out_of_order_since: Option<Instant>,
}

impl SequenceValidator {
    pub fn new() -> Self {
        Self {
            last_sequence: None,
            last_source: None,
            potential_wrap_around: false,
            resync_window: None,
            out_of_order_since: None,
        }
    }

    /// Enable re-keying the sequence when rejected packets keep arriving.
    pub fn with_resync_window(mut self, window: Duration) -> Self {
        self.resync_window = Some(window);
        self
    }

    pub fn last_sequence(&self) -> Option<u16> {
        self.last_sequence
    }

    pub fn last_source(&self) -> Option<u8> {
        self.last_source
    }

    pub fn potential_wrap_around(&self) -> bool {
        self.potential_wrap_around
    }

    /// Classify a packet and update the state accordingly.
    pub fn classify(&mut self, sequence: u16, source: u8) -> SequenceClass {
        self.classify_at(sequence, source, Instant::now())
    }

    /// Same as [`classify`](Self::classify) with an explicit arrival time.
    pub fn classify_at(&mut self, sequence: u16, source: u8, now: Instant) -> SequenceClass {
        if self.last_source != Some(source) {
            if let Some(previous) = self.last_source {
                tracing::info!(previous, source, "Contributing source changed, resetting sequence");
            }
            self.last_source = Some(source);
            self.reset_sequence();
        }

        let Some(last) = self.last_sequence else {
            tracing::info!(sequence, source, "Read first packet");
            self.accept(sequence);
            return SequenceClass::First;
        };

        let class = if sequence == last {
            SequenceClass::Duplicate
        } else if sequence < last && !self.potential_wrap_around {
            SequenceClass::Late
        } else if sequence < last {
            SequenceClass::WrapAround
        } else if u32::from(sequence) == u32::from(last) + 1 {
            SequenceClass::InOrder
        } else {
            SequenceClass::Early
        };

        match class {
            SequenceClass::Duplicate | SequenceClass::Late => {
                if self.try_resync(now) {
                    tracing::info!(
                        sequence,
                        "Adjusting the packet sequencing, restarting with this packet"
                    );
                    self.accept(sequence);
                    return SequenceClass::Resync;
                }
                tracing::warn!(sequence, last, source, ?class, "Out-of-order packet, skipping");
            }
            SequenceClass::WrapAround => {
                tracing::info!(sequence, last, "Sequence number wrapped around and restarted");
                self.potential_wrap_around = false;
                self.accept(sequence);
            }
            SequenceClass::Early => {
                tracing::warn!(
                    sequence,
                    last,
                    source,
                    missing = u32::from(sequence) - u32::from(last) - 1,
                    "Packet earlier than expected, processing as the current packet"
                );
                self.accept(sequence);
            }
            _ => self.accept(sequence),
        }

        class
    }

    /// Forget the tracked sequence, keeping the source.
    pub fn reset_sequence(&mut self) {
        self.last_sequence = None;
        self.potential_wrap_around = false;
        self.out_of_order_since = None;
    }

    fn accept(&mut self, sequence: u16) {
        self.last_sequence = Some(sequence);
        self.out_of_order_since = None;
        if u32::from(sequence) >= MAX_SEQUENCE - WRAP_AROUND_RANGE {
            self.potential_wrap_around = true;
        }
    }

    /// Returns true when this rejection should restart the sequencing.
    fn try_resync(&mut self, now: Instant) -> bool {
        let Some(window) = self.resync_window else {
            return false;
        };
        match self.out_of_order_since {
            None => {
                self.out_of_order_since = Some(now);
                false
            }
            Some(since) => now.saturating_duration_since(since) <= window,
        }
    }
}

impl Default for SequenceValidator {
    fn default() -> Self {
        Self::new()
    }
}
