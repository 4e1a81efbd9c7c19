//! Thread-safe set of channel listeners

use parking_lot::Mutex;
use std::sync::Arc;

use super::DacListener;
use crate::error::NetworkError;
use crate::network::ChannelFrame;
use crate::protocol::validate_channel;

/// The listeners subscribed to a receiver.
///
/// Add, remove and notify are the only operations. Notification works on a
/// snapshot, so a listener may unsubscribe from inside `data_arrived`.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<Vec<Arc<dyn DacListener>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Fails if its channel is not 1-4.
    pub fn add(&self, listener: Arc<dyn DacListener>) -> Result<(), NetworkError> {
        let channel = validate_channel(listener.channel())?;
        self.subscribers.lock().push(listener);
        tracing::info!(channel, "Added subscriber");
        Ok(())
    }

    /// Remove a listener previously added. Returns false if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn DacListener>) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| !same_listener(s, listener));
        let removed = subscribers.len() != before;
        if removed {
            tracing::info!(channel = listener.channel(), "Removed subscriber");
        }
        removed
    }

    /// Deliver each subscriber the chunk for its channel.
    pub fn notify(&self, frame: &ChannelFrame) {
        let snapshot: Vec<Arc<dyn DacListener>> = self.subscribers.lock().clone();
        for listener in snapshot {
            if let Some(chunk) = frame.chunk(listener.channel()) {
                listener.data_arrived(chunk);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Identity comparison on the data pointer; vtable pointers for the same
/// type may differ between codegen units.
fn same_listener(a: &Arc<dyn DacListener>, b: &Arc<dyn DacListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
