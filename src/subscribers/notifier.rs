//! Single-worker FIFO dispatch
//!
//! Notification runs off the receive thread so slow subscribers never delay
//! the next socket read. Exactly one worker drains the queue, which keeps
//! packets in the order they were accepted.

use crossbeam_channel::{unbounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::SubscriberRegistry;
use crate::error::NetworkError;
use crate::network::ChannelFrame;

pub struct OrderedNotifier {
    sender: Sender<ChannelFrame>,
    halted: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl OrderedNotifier {
    /// Start the worker delivering to `registry`.
    ///
    /// The worker runs until every handle to the notifier is dropped.
    pub fn spawn(registry: Arc<SubscriberRegistry>) -> Result<Self, NetworkError> {
        let (sender, receiver) = unbounded::<ChannelFrame>();
        let halted = Arc::new(AtomicBool::new(false));
        let halted_for_worker = halted.clone();

        let handle = thread::Builder::new()
            .name("dac-notifier".into())
            .spawn(move || {
                for frame in receiver {
                    if halted_for_worker.load(Ordering::Acquire) {
                        break;
                    }
                    registry.notify(&frame);
                }
                tracing::debug!("Notifier worker exiting");
            })
            .map_err(|e| NetworkError::Spawn(e.to_string()))?;

        Ok(Self {
            sender,
            halted,
            thread_handle: Some(handle),
        })
    }

    /// Queue a frame for delivery. Returns false once shut down.
    pub fn submit(&self, frame: ChannelFrame) -> bool {
        if self.is_halted() {
            return false;
        }
        self.sender.send(frame).is_ok()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Stop immediately. Queued frames are dropped and the worker is not
    /// waited for; it exits after the delivery in progress, if any.
    pub fn shutdown_now(&self) {
        self.halted.store(true, Ordering::Release);
    }

    /// Deliver everything already queued, then wait for the worker to exit.
    pub fn shutdown(self) {
        let OrderedNotifier {
            sender,
            thread_handle,
            ..
        } = self;
        drop(sender);
        if let Some(handle) = thread_handle {
            let _ = handle.join();
        }
    }
}
