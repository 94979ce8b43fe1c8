//! In-process wake channel

use crate::channel::{WakeChannel, WakeSubscription};
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// In-process hub connecting every node that shares it.
///
/// Each channel has at most one subscriber; subscribing again replaces the
/// previous subscription. Cloning the hub shares the same registry.
#[derive(Clone)]
pub struct LocalWakeHub {
    channels: Arc<RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>>>,
    capacity: usize,
}

impl LocalWakeHub {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create a hub whose subscriptions buffer up to `capacity` messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Names of channels with a live subscriber
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .read()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for LocalWakeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeChannel for LocalWakeHub {
    fn subscribe(&self, channel: &str) -> Result<WakeSubscription> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self
            .channels
            .write()
            .insert(channel.to_string(), tx)
            .is_some()
        {
            debug!(channel, "Replaced existing subscription");
        }
        Ok(WakeSubscription::new(channel, rx))
    }

    fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.channels.write().remove(channel);
        Ok(())
    }

    fn publish(&self, channel: &str, message: &[u8]) -> Result<usize> {
        let sender = match self.channels.read().get(channel) {
            Some(tx) => tx.clone(),
            None => return Ok(0),
        };

        match sender.try_send(message.to_vec()) {
            Ok(()) => Ok(1),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(channel, "Subscriber is full, dropping message");
                Ok(0)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let mut channels = self.channels.write();
                if channels.get(channel).is_some_and(|tx| tx.same_channel(&sender)) {
                    channels.remove(channel);
                }
                Ok(0)
            }
        }
    }
}
