//! Live playback of one DAC channel
//!
//! A [`LiveStreamer`] is a channel listener that queues arriving audio into
//! its own ring buffer, and a writer thread that moves it from the ring
//! buffer into an output line:
//!
//! ```text
//!  Closed ──open──▶ Warming ──device buffer full──▶ Playing
//!    ▲                                                 │
//!    └──────── close + rewind ◀── Error ◀── underrun ──┘
//!                                   │
//!                                   └─ max_restart_attempts reached ─▶ Terminated
//! ```
//!
//! Warm-up fills the device's internal buffer before its clock starts, so
//! the first audio heard already has a full buffer of jitter protection.

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

use super::buffer::{RingBuffer, SharedRingBuffer};
use super::line::{AudioFormat, OutputLine};
use crate::config::StreamConfig;
use crate::error::{AudioError, BufferError, Error, Result};
use crate::protocol::{validate_channel, DATA_PAYLOAD_SIZE};
use crate::subscribers::DacListener;

/// Where the writer thread is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// Line not open (before start, between restarts, after dispose)
    Closed = 0,
    /// Filling the device buffer, clock not started
    Warming = 1,
    Playing = 2,
    /// Device problem detected, restart pending
    Error = 3,
    /// Gave up after repeated device errors; will not restart
    Terminated = 4,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Warming,
            2 => StreamState::Playing,
            3 => StreamState::Error,
            4 => StreamState::Terminated,
            _ => StreamState::Closed,
        }
    }
}

/// Lifecycle notifications sent to playback listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Opened,
    Started,
    Stopped,
    Closed,
    /// The stream stopped for good after `attempts` device errors
    Failed { attempts: u32, reason: String },
}

/// Observer of a live stream's lifecycle
pub trait PlaybackListener: Send + Sync {
    fn update(&self, event: &StreamEvent);
}

/// State shared between the streamer handle and its writer thread
struct Shared {
    id: Uuid,
    state: AtomicU8,
    closed: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn PlaybackListener>>>,
}

impl Shared {
    fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: StreamEvent) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.update(&event);
        }
    }
}

/// Configures and starts a [`LiveStreamer`]
pub struct LiveStreamerBuilder {
    channel: u8,
    config: StreamConfig,
    listeners: Vec<Arc<dyn PlaybackListener>>,
}

impl LiveStreamerBuilder {
    pub fn config(mut self, config: &StreamConfig) -> Self {
        self.config = config.clone();
        self.config.channel = self.channel;
        self
    }

    /// Register a playback listener before the first event is sent.
    pub fn listener(mut self, listener: Arc<dyn PlaybackListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Open the line built by `make_line` and start streaming.
    ///
    /// The line is created and opened on the writer thread; this returns
    /// once the first open has succeeded, or with its error.
    pub fn start<L, F>(self, make_line: F) -> Result<LiveStreamer>
    where
        L: OutputLine + 'static,
        F: FnOnce() -> std::result::Result<L, AudioError> + Send + 'static,
    {
        let channel = validate_channel(self.channel)?;
        if self.config.ring_buffer_bytes == 0 {
            return Err(Error::Config("ring_buffer_bytes must be > 0".into()));
        }

        let format = AudioFormat::dac(self.config.encoding);
        let buffer = Arc::new(RingBuffer::with_fill(
            self.config.ring_buffer_bytes,
            format.encoding.silence(),
        ));
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            state: AtomicU8::new(StreamState::Closed as u8),
            closed: AtomicBool::new(false),
            listeners: Mutex::new(self.listeners),
        });

        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), AudioError>>(1);
        let writer = DeviceWriter {
            shared: shared.clone(),
            buffer: buffer.clone(),
            format,
            idle_sleep: self.config.idle_sleep(),
            max_attempts: self.config.max_restart_attempts.max(1),
        };

        let handle = thread::Builder::new()
            .name(format!("dac-playback-ch{}", channel))
            .spawn(move || writer.run(make_line, ready_tx))
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        let opened = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::Thread("writer exited during open".into())));
        if let Err(e) = opened {
            let _ = handle.join();
            return Err(e.into());
        }

        tracing::info!(stream = %shared.id, channel, "Live stream started");
        Ok(LiveStreamer {
            channel,
            buffer,
            shared,
            thread_handle: Mutex::new(Some(handle)),
        })
    }

    /// Start streaming to a sound card through cpal (`config.device`, or
    /// the default output device).
    #[cfg(feature = "playback")]
    pub fn start_on_device(self) -> Result<LiveStreamer> {
        let device = self.config.device.clone();
        let buffer_bytes = self.config.device_buffer_bytes;
        self.start(move || super::device::CpalOutputLine::new(device.as_deref(), buffer_bytes))
    }
}

/// Streams the audio of one channel to an output line
pub struct LiveStreamer {
    channel: u8,
    buffer: SharedRingBuffer,
    shared: Arc<Shared>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LiveStreamer {
    pub fn builder(channel: u8) -> LiveStreamerBuilder {
        LiveStreamerBuilder {
            channel,
            config: StreamConfig {
                channel,
                ..Default::default()
            },
            listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Bytes waiting in the ring buffer
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn register_playback_listener(&self, listener: Arc<dyn PlaybackListener>) {
        self.shared.listeners.lock().push(listener);
    }

    pub fn deregister_playback_listener(&self, listener: &Arc<dyn PlaybackListener>) {
        self.shared.listeners.lock().retain(|l| {
            !std::ptr::eq(
                Arc::as_ptr(l) as *const (),
                Arc::as_ptr(listener) as *const (),
            )
        });
    }

    /// Stop the stream and wait for the writer thread.
    ///
    /// Sets the close flag and closes the ring buffer, which wakes the
    /// writer if it is waiting for data. A writer inside a device call
    /// finishes that call first.
    ///
    /// Called from a playback listener (on the writer thread itself) this
    /// only requests the stop; the writer exits after the callback returns.
    pub fn dispose(&self) {
        let first = !self.shared.closed.swap(true, Ordering::SeqCst);
        if first {
            self.buffer.close();
        }

        let handle = {
            let mut guard = self.thread_handle.lock();
            match guard.as_ref() {
                Some(handle) if handle.thread().id() == thread::current().id() => None,
                _ => guard.take(),
            }
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(stream = %self.shared.id, "Playback thread panicked");
            }
        }

        if first {
            tracing::info!(
                stream = %self.shared.id,
                channel = self.channel,
                "Live stream disposed"
            );
        }
    }
}

impl DacListener for LiveStreamer {
    fn data_arrived(&self, payload: &[u8]) {
        match self.buffer.add_data(payload) {
            Ok(()) => {}
            // Disposed or terminated; nothing will play this
            Err(BufferError::Closed) => {}
            Err(e) => {
                tracing::error!(stream = %self.shared.id, "Rejected audio payload: {}", e);
            }
        }
    }

    fn channel(&self) -> u8 {
        self.channel
    }
}

impl Drop for LiveStreamer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Why a warm-up/playback cycle ended
enum Cycle {
    Disposed,
    DeviceError(String),
}

/// The writer thread
struct DeviceWriter {
    shared: Arc<Shared>,
    buffer: SharedRingBuffer,
    format: AudioFormat,
    idle_sleep: Duration,
    max_attempts: u32,
}

impl DeviceWriter {
    fn run<L, F>(self, make_line: F, ready: Sender<std::result::Result<(), AudioError>>)
    where
        L: OutputLine,
        F: FnOnce() -> std::result::Result<L, AudioError>,
    {
        let mut line = match make_line().and_then(|mut line| {
            line.open(&self.format)?;
            Ok(line)
        }) {
            Ok(line) => line,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        self.shared.emit(StreamEvent::Opened);

        let mut failures = 0u32;
        loop {
            let reason = match self.cycle(&mut line, &mut failures) {
                Cycle::Disposed => break,
                Cycle::DeviceError(reason) => reason,
            };

            failures += 1;
            self.shared.set_state(StreamState::Error);
            tracing::warn!(
                stream = %self.shared.id,
                attempt = failures,
                max = self.max_attempts,
                "Audio device error: {}",
                reason
            );
            if line.is_open() {
                line.close();
            }
            self.shared.emit(StreamEvent::Stopped);
            // Stale audio behind the underrun is skipped, not replayed later
            self.buffer.rewind_full();

            if !self.reopen(&mut line, &mut failures, reason) {
                return;
            }
        }

        if line.is_open() {
            line.close();
        }
        self.shared.set_state(StreamState::Closed);
        self.shared.emit(StreamEvent::Closed);
    }

    /// Warm up, then play until disposal or a device error.
    fn cycle<L: OutputLine>(&self, line: &mut L, failures: &mut u32) -> Cycle {
        self.shared.set_state(StreamState::Warming);
        loop {
            let available = line.available();
            if available == 0 {
                break;
            }
            if self.shared.is_closed() {
                return Cycle::Disposed;
            }
            match self.buffer.write_to_line(line, available) {
                Ok(0) => {
                    return Cycle::DeviceError("line accepted no data during warm-up".into());
                }
                Ok(_) => {}
                Err(AudioError::LineClosed) if self.buffer.is_closed() => return Cycle::Disposed,
                Err(e) => return Cycle::DeviceError(e.to_string()),
            }
        }

        if let Err(e) = line.start() {
            return Cycle::DeviceError(e.to_string());
        }
        self.shared.set_state(StreamState::Playing);
        self.shared.emit(StreamEvent::Started);

        let buffer_size = line.buffer_size();
        // Small device buffers are topped up at half empty, well before the
        // underrun check can fire
        let refill_threshold = DATA_PAYLOAD_SIZE.min(buffer_size / 2).max(1);
        let mut played = 0usize;
        loop {
            if self.shared.is_closed() {
                return Cycle::Disposed;
            }

            let available = line.available();
            if available >= buffer_size {
                return Cycle::DeviceError(format!(
                    "device buffer drained ({} of {} bytes free)",
                    available, buffer_size
                ));
            }
            if available < refill_threshold {
                thread::sleep(self.idle_sleep);
                continue;
            }

            match self.buffer.write_to_line(line, available) {
                Ok(written) => {
                    played += written;
                    if *failures > 0 && played >= buffer_size {
                        tracing::info!(stream = %self.shared.id, "Playback recovered");
                        *failures = 0;
                    }
                }
                Err(AudioError::LineClosed) if self.buffer.is_closed() => return Cycle::Disposed,
                Err(e) => return Cycle::DeviceError(e.to_string()),
            }
        }
    }

    /// Reopen after an error. Returns false if the stream is finished.
    fn reopen<L: OutputLine>(&self, line: &mut L, failures: &mut u32, mut reason: String) -> bool {
        loop {
            if self.shared.is_closed() {
                self.shared.set_state(StreamState::Closed);
                self.shared.emit(StreamEvent::Closed);
                return false;
            }
            if *failures >= self.max_attempts {
                self.terminate(*failures, reason);
                return false;
            }

            self.shared.set_state(StreamState::Closed);
            match line.open(&self.format) {
                Ok(()) => {
                    tracing::info!(stream = %self.shared.id, "Restarting playback");
                    self.shared.emit(StreamEvent::Opened);
                    return true;
                }
                Err(e) => {
                    *failures += 1;
                    tracing::warn!(
                        stream = %self.shared.id,
                        attempt = *failures,
                        "Failed to reopen audio device: {}",
                        e
                    );
                    reason = e.to_string();
                    thread::sleep(self.idle_sleep);
                }
            }
        }
    }

    fn terminate(&self, attempts: u32, reason: String) {
        tracing::error!(
            stream = %self.shared.id,
            attempts,
            "Audio device failed repeatedly, closing live stream: {}",
            reason
        );
        self.shared.set_state(StreamState::Terminated);
        // Unblocks the producer; later payloads are discarded
        self.buffer.close();
        self.shared.emit(StreamEvent::Closed);
        self.shared.emit(StreamEvent::Failed { attempts, reason });
    }
}
