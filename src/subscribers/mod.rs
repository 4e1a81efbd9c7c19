//! Channel listeners and ordered delivery

pub mod notifier;
pub mod registry;

pub use notifier::OrderedNotifier;
pub use registry::SubscriberRegistry;

/// Receives the audio of one DAC channel.
///
/// `data_arrived` runs on the single notification worker, one packet at a
/// time and in sequence order. It may block briefly for backpressure but must
/// not do unbounded work, since every other subscriber waits behind it.
pub trait DacListener: Send + Sync {
    /// Audio for this listener's channel from one accepted packet
    fn data_arrived(&self, payload: &[u8]);

    /// The channel (1-4) this listener wants
    fn channel(&self) -> u8;
}
