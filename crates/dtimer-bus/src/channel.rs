//! Publish/subscribe transport for wake hints

use crate::error::Result;
use tokio::sync::mpsc;

/// Best-effort publish/subscribe transport addressed by channel name.
///
/// Messages are opaque bytes. Delivery is not guaranteed: a publish to a
/// channel without a subscriber, or to a subscriber that is not keeping up,
/// is dropped.
pub trait WakeChannel: Send + Sync {
    /// Start receiving messages published to `channel`
    fn subscribe(&self, channel: &str) -> Result<WakeSubscription>;

    /// Stop delivering messages for `channel`
    fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Publish `message` to `channel`, returning the number of subscribers
    /// it was handed to
    fn publish(&self, channel: &str, message: &[u8]) -> Result<usize>;
}

/// Receiving half of a channel subscription
#[derive(Debug)]
pub struct WakeSubscription {
    channel: String,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl WakeSubscription {
    pub fn new(channel: impl Into<String>, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message
    ///
    /// Returns `None` once the transport has dropped the subscription.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}
