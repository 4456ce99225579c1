//! Outbound side of the chat panel connection.

use assistant_core::BridgeEvent;
use tokio::sync::mpsc;

/// Sink for panel events.
///
/// `post` must not block: it is called while the conversation store is
/// locked so that a mutation and its notification stay atomic.
pub trait Bridge: Send + Sync {
    fn post(&self, event: BridgeEvent);
}

/// Bridge backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelBridge {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl ChannelBridge {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Bridge for ChannelBridge {
    fn post(&self, event: BridgeEvent) {
        if let Err(err) = self.tx.send(event) {
            log::debug!("Panel receiver dropped, discarding {:?}", err.0);
        }
    }
}

/// Everything currently queued on `rx`.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<BridgeEvent>) -> Vec<BridgeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
