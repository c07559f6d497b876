//! Position-changed notifications.
//!
//! Delivery is at-most-once per committed fix with no replay. Notifiers are
//! invoked while the tag's update is still serialized, so implementations
//! must not call back into the tag store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;

use crate::api::types::{PositionUpdate, POSITION_UPDATE_EVENT};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notification receiver disconnected")]
    Disconnected,
    #[error("{failed} of {total} notifiers failed")]
    Partial { failed: usize, total: usize },
}

/// Sink for position updates
pub trait PositionNotifier: Send + Sync {
    fn notify(&self, update: &PositionUpdate) -> Result<(), NotifyError>;
}

/// Emits updates as tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl PositionNotifier for LogNotifier {
    fn notify(&self, update: &PositionUpdate) -> Result<(), NotifyError> {
        tracing::info!(event = POSITION_UPDATE_EVENT, tag = %update.id, x = update.x, y = update.y);
        Ok(())
    }
}

/// Callback function type for position updates
pub type PositionCallback = Box<dyn Fn(&PositionUpdate) + Send + Sync>;

/// Callback registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackHandle(u32);

impl CallbackHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Invokes registered callbacks in registration order
#[derive(Default)]
pub struct CallbackNotifier {
    counter: AtomicU32,
    callbacks: RwLock<BTreeMap<CallbackHandle, PositionCallback>>,
}

impl CallbackNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: PositionCallback) -> CallbackHandle {
        let handle = CallbackHandle(self.counter.fetch_add(1, Ordering::Relaxed) + 1);
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, callback);
        handle
    }

    /// Returns `false` if the handle was not registered
    pub fn unregister(&self, handle: CallbackHandle) -> bool {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PositionNotifier for CallbackNotifier {
    fn notify(&self, update: &PositionUpdate) -> Result<(), NotifyError> {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.values() {
            callback(update);
        }
        Ok(())
    }
}

/// Forwards updates over an mpsc channel
#[derive(Debug)]
pub struct ChannelNotifier {
    sender: Mutex<mpsc::Sender<PositionUpdate>>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::Sender<PositionUpdate>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }

    /// Notifier plus the receiving end
    pub fn channel() -> (Self, mpsc::Receiver<PositionUpdate>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }
}

impl PositionNotifier for ChannelNotifier {
    fn notify(&self, update: &PositionUpdate) -> Result<(), NotifyError> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(update.clone())
            .map_err(|_| NotifyError::Disconnected)
    }
}

/// Delivers to every inner notifier even if some fail
#[derive(Default)]
pub struct FanOutNotifier {
    notifiers: Vec<Arc<dyn PositionNotifier>>,
}

impl FanOutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn PositionNotifier>>) -> Self {
        Self { notifiers }
    }

    pub fn push(&mut self, notifier: Arc<dyn PositionNotifier>) {
        self.notifiers.push(notifier);
    }
}

impl PositionNotifier for FanOutNotifier {
    fn notify(&self, update: &PositionUpdate) -> Result<(), NotifyError> {
        let failed = self
            .notifiers
            .iter()
            .filter(|n| n.notify(update).is_err())
            .count();
        if failed > 0 {
            return Err(NotifyError::Partial {
                failed,
                total: self.notifiers.len(),
            });
        }
        Ok(())
    }
}
