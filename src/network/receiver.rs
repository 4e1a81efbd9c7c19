//! DAC packet receiver
//!
//! Owns the UDP socket and a dedicated receive thread. Each datagram is
//! parsed, checked for ordering, split into channels and handed to the
//! ordered notifier; the receive thread never calls a subscriber itself.

use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::demux::demultiplex;
use super::sequence::SequenceValidator;
use super::stats::{PacketLogger, ReceiverCounters, ReceiverStats};
use super::udp::{create_socket, leave_multicast};
use crate::config::{NetworkConfig, SequenceConfig};
use crate::error::NetworkError;
use crate::protocol::{PacketHeader, PACKET_SIZE};
use crate::subscribers::{DacListener, OrderedNotifier, SubscriberRegistry};

/// Receives DAC packets and fans the channels out to subscribers
pub struct DacReceiver {
    config: NetworkConfig,
    resync_window: Option<Duration>,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    registry: Arc<SubscriberRegistry>,
    notifier: Arc<OrderedNotifier>,
    counters: Arc<ReceiverCounters>,
    halt: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DacReceiver {
    /// Bind the receive socket.
    ///
    /// A bind failure is returned here; there is no receiver to start.
    pub fn bind(config: NetworkConfig, sequence: &SequenceConfig) -> Result<Self, NetworkError> {
        let socket = create_socket(&config).map_err(|e| {
            tracing::error!("Failed to bind to port {}: {}", config.udp_port, e);
            e
        })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| NetworkError::BindFailed {
                port: config.udp_port,
                source,
            })?;

        let registry = Arc::new(SubscriberRegistry::new());
        let notifier = OrderedNotifier::spawn(registry.clone())?;

        tracing::info!("Ready to listen for DAC packets on {}", local_addr);

        Ok(Self {
            config,
            resync_window: sequence.resync_window(),
            socket: Arc::new(socket),
            local_addr,
            registry,
            notifier: Arc::new(notifier),
            counters: Arc::new(ReceiverCounters::default()),
            halt: Arc::new(AtomicBool::new(false)),
            thread_handle: Mutex::new(None),
        })
    }

    /// Spawn the receive thread.
    pub fn start(&self) -> Result<(), NetworkError> {
        let mut thread_handle = self.thread_handle.lock();
        if thread_handle.is_some() || self.halt.load(Ordering::SeqCst) {
            return Err(NetworkError::AlreadyStarted);
        }

        let receive_loop = self.receive_loop();
        let handle = thread::Builder::new()
            .name(format!("dac-receive-{}", self.local_addr.port()))
            .spawn(move || receive_loop.run())
            .map_err(|e| NetworkError::Spawn(e.to_string()))?;

        *thread_handle = Some(handle);
        Ok(())
    }

    /// Run the receive loop on the calling thread until [`halt`](Self::halt)
    /// is called from another thread.
    pub fn run(&self) {
        self.receive_loop().run();
    }

    /// Stop receiving and stop notifying subscribers.
    ///
    /// Notifications still queued are dropped. Returns once the receive
    /// thread has exited, at most one socket timeout later.
    pub fn halt(&self) {
        if self.halt.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Initiating shutdown sequence ...");
        self.notifier.shutdown_now();

        let handle = self.thread_handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Receive thread panicked");
            }
        }

        if let Err(e) = leave_multicast(&self.socket, &self.config) {
            tracing::error!("{}", e);
        }
        tracing::info!("Terminated the connection to the DAC.");
    }

    /// Add a listener. Rejects channels outside 1-4.
    pub fn subscribe(&self, listener: Arc<dyn DacListener>) -> Result<(), NetworkError> {
        self.registry.add(listener)
    }

    pub fn unsubscribe(&self, listener: &Arc<dyn DacListener>) -> bool {
        self.registry.remove(listener)
    }

    pub fn has_subscribers(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.lock().is_some() && !self.halt.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ReceiverStats {
        self.counters.snapshot()
    }

    fn receive_loop(&self) -> ReceiveLoop {
        let mut validator = SequenceValidator::new();
        if let Some(window) = self.resync_window {
            validator = validator.with_resync_window(window);
        }
        ReceiveLoop {
            socket: self.socket.clone(),
            registry: self.registry.clone(),
            notifier: self.notifier.clone(),
            counters: self.counters.clone(),
            halt: self.halt.clone(),
            validator,
            stats_interval: Duration::from_secs(self.config.stats_interval_secs),
        }
    }
}

impl Drop for DacReceiver {
    fn drop(&mut self) {
        self.halt();
    }
}

/// State owned by the receive thread
struct ReceiveLoop {
    socket: Arc<UdpSocket>,
    registry: Arc<SubscriberRegistry>,
    notifier: Arc<OrderedNotifier>,
    counters: Arc<ReceiverCounters>,
    halt: Arc<AtomicBool>,
    validator: SequenceValidator,
    stats_interval: Duration,
}

impl ReceiveLoop {
    fn run(mut self) {
        tracing::info!("Listening for DAC packets ...");
        let mut logger = PacketLogger::new("DAC receive", self.stats_interval);
        let mut packet_buffer = vec![0u8; PACKET_SIZE];

        while !self.halt.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut packet_buffer) {
                Ok((len, _src)) => {
                    if let Some(packet) = packet_buffer.get(..len) {
                        self.process(packet);
                    }
                    logger.packet_processed();
                }
                // Read timeout: gives the halt flag a chance to be seen
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => {
                    if self.halt.load(Ordering::Relaxed) {
                        break;
                    }
                    tracing::error!("Failed to receive data from the DAC: {}", e);
                }
            }
        }

        logger.flush();
        tracing::info!("Shutting down ...");
    }

    fn process(&mut self, packet: &[u8]) {
        self.counters.record_datagram(packet.len());

        let header = match PacketHeader::parse(packet) {
            Ok(header) => header,
            Err(e) => {
                self.counters.record_invalid();
                tracing::warn!("Dropping invalid datagram: {}", e);
                return;
            }
        };

        let class = self
            .validator
            .classify(header.sequence_number, header.contributing_source);
        self.counters.record_class(class);
        if !class.is_accepted() || self.registry.is_empty() {
            return;
        }

        let frame = demultiplex(packet, header.sequence_number);
        if !self.notifier.submit(frame) {
            tracing::debug!("Notifier stopped, dropping packet {}", header.sequence_number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DAC_CHANNELS, DATA_PAYLOAD_SIZE};
    use crate::subscribers::registry::tests::RecordingListener;
    use std::net::Ipv4Addr;
    use std::time::Instant;

    fn local_config() -> NetworkConfig {
        NetworkConfig {
            udp_port: 0,
            bind_address: Ipv4Addr::LOCALHOST,
            recv_timeout_ms: 20,
            ..Default::default()
        }
    }

    fn packet(sequence: u16, source: u8) -> Vec<u8> {
        let header = PacketHeader {
            sequence_number: sequence,
            contributing_source: source,
            ..Default::default()
        };
        let mut packet = header.to_bytes().to_vec();
        for channel in 1..=DAC_CHANNELS {
            // First byte tags the sequence so tests can tell packets apart
            let mut chunk = vec![channel; DATA_PAYLOAD_SIZE];
            chunk[0] = sequence as u8;
            packet.extend(chunk);
        }
        packet
    }

    #[test]
    fn test_bind_failure_is_immediate() {
        let first = DacReceiver::bind(local_config(), &SequenceConfig::default()).unwrap();
        let config = NetworkConfig {
            udp_port: first.local_addr().port(),
            ..local_config()
        };
        let second = DacReceiver::bind(config, &SequenceConfig::default());
        assert!(matches!(second, Err(NetworkError::BindFailed { .. })));
    }

    #[test]
    fn test_subscribe_rejects_invalid_channel() {
        let receiver = DacReceiver::bind(local_config(), &SequenceConfig::default()).unwrap();
        assert!(receiver.subscribe(RecordingListener::new(0)).is_err());
        assert!(receiver.subscribe(RecordingListener::new(5)).is_err());
        assert!(!receiver.has_subscribers());
    }

    #[test]
    fn test_rejected_packets_not_forwarded() {
        let receiver = DacReceiver::bind(local_config(), &SequenceConfig::default()).unwrap();
        let listener = RecordingListener::new(2);
        receiver.subscribe(listener.clone()).unwrap();

        let mut receive_loop = receiver.receive_loop();
        for sequence in [5, 6, 6, 4, 7] {
            receive_loop.process(&packet(sequence, 1));
        }
        receive_loop.process(&[0x80, 0x79]);

        let deadline = Instant::now() + Duration::from_secs(2);
        while listener.received.lock().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        // Anything wrongly forwarded would have been queued before packet 7
        thread::sleep(Duration::from_millis(20));

        let received: Vec<u8> = listener.received.lock().iter().map(|p| p[0]).collect();
        assert_eq!(received, vec![5, 6, 7]);
        assert!(listener.received.lock().iter().all(|p| p[1] == 2));
    }

    #[test]
    fn test_counters_track_classes() {
        let receiver = DacReceiver::bind(local_config(), &SequenceConfig::default()).unwrap();
        let mut receive_loop = receiver.receive_loop();
        for sequence in [10, 11, 11, 9, 20] {
            receive_loop.process(&packet(sequence, 1));
        }
        receive_loop.process(&[0u8; 4]);

        let stats = receiver.stats();
        assert_eq!(stats.packets_received, 6);
        assert_eq!(stats.invalid_packets, 1);
        assert_eq!(stats.in_order, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.late, 1);
        assert_eq!(stats.early, 1);
    }

    #[test]
    fn test_halt_stops_thread() {
        let receiver = DacReceiver::bind(local_config(), &SequenceConfig::default()).unwrap();
        receiver.start().unwrap();
        assert!(receiver.is_running());
        assert!(matches!(receiver.start(), Err(NetworkError::AlreadyStarted)));

        receiver.halt();
        assert!(!receiver.is_running());
        assert!(matches!(receiver.start(), Err(NetworkError::AlreadyStarted)));
    }

    #[test]
    fn test_halt_ends_run_on_caller_thread() {
        let receiver = DacReceiver::bind(local_config(), &SequenceConfig::default()).unwrap();
        let listener = RecordingListener::new(1);
        receiver.subscribe(listener.clone()).unwrap();
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

        thread::scope(|s| {
            let running = s.spawn(|| receiver.run());

            sender.send_to(&packet(1, 1), receiver.local_addr()).unwrap();
            let deadline = Instant::now() + Duration::from_secs(2);
            while listener.received.lock().is_empty() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(listener.received.lock().len(), 1);

            let halted_at = Instant::now();
            receiver.halt();
            running.join().unwrap();
            assert!(halted_at.elapsed() < Duration::from_secs(1));
        });
        assert!(!receiver.is_running());
    }
}
