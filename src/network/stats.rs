//! Receive statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::sequence::SequenceClass;

/// Counters updated by the receive loop
#[derive(Debug, Default)]
pub struct ReceiverCounters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    invalid_packets: AtomicU64,
    in_order: AtomicU64,
    duplicates: AtomicU64,
    late: AtomicU64,
    early: AtomicU64,
    wrap_arounds: AtomicU64,
    resyncs: AtomicU64,
}

impl ReceiverCounters {
    pub fn record_datagram(&self, len: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_class(&self, class: SequenceClass) {
        let counter = match class {
            SequenceClass::First | SequenceClass::InOrder => &self.in_order,
            SequenceClass::Duplicate => &self.duplicates,
            SequenceClass::Late => &self.late,
            SequenceClass::Early => &self.early,
            SequenceClass::WrapAround => &self.wrap_arounds,
            SequenceClass::Resync => &self.resyncs,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            in_order: self.in_order.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            early: self.early.load(Ordering::Relaxed),
            wrap_arounds: self.wrap_arounds.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the receiver counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub invalid_packets: u64,
    pub in_order: u64,
    pub duplicates: u64,
    pub late: u64,
    pub early: u64,
    pub wrap_arounds: u64,
    pub resyncs: u64,
}

impl ReceiverStats {
    /// Packets that were forwarded to subscribers
    pub fn accepted(&self) -> u64 {
        self.in_order + self.early + self.wrap_arounds + self.resyncs
    }

    /// Packets dropped by the sequence check
    pub fn rejected(&self) -> u64 {
        self.duplicates + self.late
    }
}

/// Logs a throughput summary at a fixed interval.
pub struct PacketLogger {
    name: &'static str,
    interval: Duration,
    window_start: Instant,
    packets: u64,
}

impl PacketLogger {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            window_start: Instant::now(),
            packets: 0,
        }
    }

    pub fn packet_processed(&mut self) {
        self.packets += 1;
        if self.window_start.elapsed() >= self.interval {
            self.flush();
        }
    }

    /// Log whatever has accumulated since the last summary.
    pub fn flush(&mut self) {
        let elapsed = self.window_start.elapsed();
        if self.packets > 0 {
            let rate = self.packets as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            tracing::info!(
                "{}: processed {} packets in {:.1}s ({:.1} packets/s)",
                self.name,
                self.packets,
                elapsed.as_secs_f64(),
                rate
            );
        }
        self.packets = 0;
        self.window_start = Instant::now();
    }
}
