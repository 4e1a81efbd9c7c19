//! Bounded blocking ring buffer for audio bytes
//!
//! Sits between the notification worker (producer) and the device writer
//! thread (consumer) of one live stream. The producer blocks while the data
//! would not fit, the consumer blocks while the buffer is empty, and closing
//! the buffer wakes both.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use super::line::OutputLine;
use crate::error::{AudioError, BufferError};

/// Circular storage; `head` is the next byte to read, `tail` the next to write
struct Ring {
    data: Box<[u8]>,
    head: usize,
    tail: usize,
    size: usize,
    closed: bool,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.size
    }

    /// The readable bytes as up to two contiguous slices, oldest first.
    fn readable(&self) -> (&[u8], &[u8]) {
        let first_len = self.size.min(self.capacity() - self.head);
        let first = &self.data[self.head..self.head + first_len];
        let second = &self.data[..self.size - first_len];
        (first, second)
    }

    fn push(&mut self, payload: &[u8]) {
        let capacity = self.capacity();
        let first_len = payload.len().min(capacity - self.tail);
        let (first, second) = payload.split_at(first_len);
        self.data[self.tail..self.tail + first_len].copy_from_slice(first);
        self.data[..second.len()].copy_from_slice(second);
        self.tail = (self.tail + payload.len()) % capacity;
        self.size += payload.len();
        self.check();
    }

    fn consume(&mut self, count: usize) {
        self.head = (self.head + count) % self.capacity();
        self.size -= count;
        self.check();
    }

    fn check(&self) {
        debug_assert!(self.size <= self.capacity());
        debug_assert!(self.head < self.capacity() && self.tail < self.capacity());
        debug_assert_eq!((self.head + self.size) % self.capacity(), self.tail);
    }
}

/// Fixed-capacity FIFO of bytes with blocking producer/consumer semantics
pub struct RingBuffer {
    ring: Mutex<Ring>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl RingBuffer {
    /// Create a buffer of `capacity` bytes, initially filled with zeros.
    pub fn new(capacity: usize) -> Self {
        Self::with_fill(capacity, 0)
    }

    /// Create a buffer whose unused storage holds `fill`.
    ///
    /// The fill byte is what plays if the buffer is rewound before it was
    /// ever written all the way round (see [`rewind_full`](Self::rewind_full)).
    pub fn with_fill(capacity: usize, fill: u8) -> Self {
        assert!(capacity > 0, "Capacity must be > 0");
        Self {
            ring: Mutex::new(Ring {
                data: vec![fill; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                size: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.ring.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let ring = self.ring.lock();
        ring.size == ring.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    /// Append `payload`, blocking until there is room for all of it.
    ///
    /// Fails at once if the payload is larger than the whole buffer, and
    /// with [`BufferError::Closed`] if the buffer is closed before or while
    /// waiting.
    pub fn add_data(&self, payload: &[u8]) -> Result<(), BufferError> {
        let mut ring = self.ring.lock();
        if payload.len() > ring.capacity() {
            return Err(BufferError::PayloadTooLarge {
                len: payload.len(),
                capacity: ring.capacity(),
            });
        }

        while !ring.closed && ring.free() < payload.len() {
            self.not_full.wait(&mut ring);
        }
        if ring.closed {
            return Err(BufferError::Closed);
        }
        if payload.is_empty() {
            return Ok(());
        }

        ring.push(payload);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Move up to `available` bytes into `line`, blocking while empty.
    ///
    /// Only what the line accepts is removed from the buffer. Returns the
    /// number of bytes written.
    pub fn write_to_line<L>(&self, line: &mut L, available: usize) -> Result<usize, AudioError>
    where
        L: OutputLine + ?Sized,
    {
        let mut ring = self.ring.lock();
        while !ring.closed && ring.size == 0 {
            self.not_empty.wait(&mut ring);
        }
        if ring.closed {
            return Err(AudioError::LineClosed);
        }

        let mut remaining = available.min(ring.size);
        let mut written = 0;
        {
            let (first, second) = ring.readable();
            for segment in [first, second] {
                if remaining == 0 {
                    break;
                }
                let take = remaining.min(segment.len());
                let accepted = line.write(&segment[..take])?;
                written += accepted;
                remaining -= accepted;
                if accepted < take {
                    break;
                }
            }
        }

        if written > 0 {
            ring.consume(written);
            self.not_full.notify_all();
        }
        Ok(written)
    }

    /// Copy up to `out.len()` bytes out of the buffer, blocking while empty.
    pub fn read(&self, out: &mut [u8]) -> Result<usize, BufferError> {
        let mut ring = self.ring.lock();
        while !ring.closed && ring.size == 0 {
            self.not_empty.wait(&mut ring);
        }
        if ring.closed {
            return Err(BufferError::Closed);
        }

        let count = out.len().min(ring.size);
        {
            let (first, second) = ring.readable();
            let first_len = count.min(first.len());
            out[..first_len].copy_from_slice(&first[..first_len]);
            out[first_len..count].copy_from_slice(&second[..count - first_len]);
        }
        ring.consume(count);
        self.not_full.notify_all();
        Ok(count)
    }

    /// Drop the read position onto the write position and mark the buffer
    /// full.
    ///
    /// Used after a device underrun: the buffer then holds the most recent
    /// `capacity` bytes, oldest first, so warm-up can refill the device at
    /// once and the producer overwrites them as new audio arrives.
    pub fn rewind_full(&self) {
        let mut ring = self.ring.lock();
        ring.head = ring.tail;
        ring.size = ring.capacity();
        ring.check();
        self.not_empty.notify_all();
    }

    /// Close the buffer and wake every blocked producer and consumer.
    pub fn close(&self) {
        self.ring.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::line::AudioFormat;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Duration;

    /// Line that keeps everything written, accepting at most `limit` per call
    pub(crate) struct VecLine {
        pub written: Vec<u8>,
        pub limit: usize,
    }

    impl VecLine {
        pub(crate) fn new(limit: usize) -> Self {
            Self {
                written: Vec::new(),
                limit,
            }
        }
    }

    impl OutputLine for VecLine {
        fn open(&mut self, _format: &AudioFormat) -> Result<(), AudioError> {
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<usize, AudioError> {
            let count = data.len().min(self.limit);
            self.written.extend_from_slice(&data[..count]);
            self.limit -= count;
            Ok(count)
        }

        fn available(&self) -> usize {
            self.limit
        }

        fn buffer_size(&self) -> usize {
            usize::MAX
        }

        fn start(&mut self) -> Result<(), AudioError> {
            Ok(())
        }

        fn close(&mut self) {}

        fn is_open(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_wraps_at_boundary() {
        let buffer = RingBuffer::new(8);
        buffer.add_data(&[1, 2, 3, 4, 5, 6]).unwrap();

        let mut out = [0u8; 4];
        assert_eq!(buffer.read(&mut out).unwrap(), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        // tail is at 6, so this wraps
        buffer.add_data(&[7, 8, 9, 10, 11]).unwrap();
        assert_eq!(buffer.len(), 7);

        let mut line = VecLine::new(usize::MAX);
        assert_eq!(buffer.write_to_line(&mut line, 100).unwrap(), 7);
        assert_eq!(line.written, vec![5, 6, 7, 8, 9, 10, 11]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let buffer = RingBuffer::new(4);
        let result = buffer.add_data(&[0; 5]);
        assert_eq!(
            result,
            Err(BufferError::PayloadTooLarge {
                len: 5,
                capacity: 4
            })
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_write_limited_by_available() {
        let buffer = RingBuffer::new(16);
        buffer.add_data(&[9; 10]).unwrap();

        let mut line = VecLine::new(usize::MAX);
        assert_eq!(buffer.write_to_line(&mut line, 3).unwrap(), 3);
        assert_eq!(buffer.len(), 7);
    }

    #[test]
    fn test_partial_line_accept_keeps_rest() {
        let buffer = RingBuffer::new(16);
        buffer.add_data(&[1, 2, 3, 4, 5]).unwrap();

        let mut line = VecLine::new(2);
        assert_eq!(buffer.write_to_line(&mut line, 5).unwrap(), 2);
        assert_eq!(buffer.len(), 3);

        let mut out = [0u8; 3];
        buffer.read(&mut out).unwrap();
        assert_eq!(out, [3, 4, 5]);
    }

    #[test]
    fn test_producer_blocks_until_drained() {
        let buffer = Arc::new(RingBuffer::new(10));
        buffer.add_data(&[1; 8]).unwrap();

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.add_data(&[2; 6]))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(buffer.len(), 8);

        let mut out = [0u8; 4];
        buffer.read(&mut out).unwrap();
        producer.join().unwrap().unwrap();

        let mut rest = [0u8; 10];
        assert_eq!(buffer.read(&mut rest).unwrap(), 10);
        assert_eq!(rest, [1, 1, 1, 1, 2, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn test_consumer_blocks_until_data() {
        let buffer = Arc::new(RingBuffer::new(10));
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let mut line = VecLine::new(usize::MAX);
                buffer.write_to_line(&mut line, 10).map(|_| line.written)
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!consumer.is_finished());
        buffer.add_data(&[3, 4]).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_close_wakes_blocked_threads() {
        let buffer = Arc::new(RingBuffer::new(4));
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let mut out = [0u8; 4];
                buffer.read(&mut out)
            })
        };
        thread::sleep(Duration::from_millis(20));
        buffer.close();
        assert_eq!(consumer.join().unwrap(), Err(BufferError::Closed));

        assert_eq!(buffer.add_data(&[1]), Err(BufferError::Closed));
        let mut line = VecLine::new(4);
        assert!(matches!(
            buffer.write_to_line(&mut line, 4),
            Err(AudioError::LineClosed)
        ));
    }

    #[test]
    fn test_rewind_full_replays_latest_bytes() {
        let buffer = RingBuffer::with_fill(4, 0xFF);
        buffer.add_data(&[1, 2, 3]).unwrap();
        let mut out = [0u8; 2];
        buffer.read(&mut out).unwrap();

        buffer.rewind_full();
        assert!(buffer.is_full());

        let mut all = [0u8; 4];
        buffer.read(&mut all).unwrap();
        // tail was at 3: oldest byte is the untouched fill at index 3
        assert_eq!(all, [0xFF, 1, 2, 3]);
    }

    proptest! {
        #[test]
        fn prop_fifo_regardless_of_chunking(
            chunks in vec(vec(any::<u8>(), 0..40), 0..20),
            reads in proptest::collection::vec(1usize..50, 1..20),
        ) {
            let total: usize = chunks.iter().map(Vec::len).sum();
            let buffer = RingBuffer::new(total.max(1));
            let mut expected = Vec::new();
            for chunk in &chunks {
                buffer.add_data(chunk).unwrap();
                expected.extend_from_slice(chunk);
            }

            let mut line = VecLine::new(usize::MAX);
            let mut reads = reads.iter().cycle();
            while !buffer.is_empty() {
                let available = *reads.next().unwrap();
                buffer.write_to_line(&mut line, available).unwrap();
            }
            prop_assert_eq!(line.written, expected);
        }

        #[test]
        fn prop_fifo_with_concurrent_consumer(
            chunks in vec(vec(any::<u8>(), 1..30), 1..30),
            capacity in 30usize..64,
        ) {
            let buffer = Arc::new(RingBuffer::new(capacity));
            let expected: Vec<u8> = chunks.concat();
            let total = expected.len();

            let consumer = {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    let mut line = VecLine::new(usize::MAX);
                    while line.written.len() < total {
                        buffer.write_to_line(&mut line, 7).unwrap();
                    }
                    line.written
                })
            };
            for chunk in &chunks {
                buffer.add_data(chunk).unwrap();
            }
            prop_assert_eq!(consumer.join().unwrap(), expected);
        }
    }
}
