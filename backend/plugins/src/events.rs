//! Runtime event bus.
//!
//! Publish-subscribe fanout for runtime-level signals; the admin layer
//! subscribes to push reload notifications to connected UIs.

use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Emitted after every successful hot reload.
    PluginsReloaded { local: usize, remote: usize },
}

pub struct EventBus {
    sender: broadcast::Sender<RuntimeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self { sender: tx }
    }

    pub fn publish(&self, event: RuntimeEvent) {
        debug!(?event, "publishing runtime event");
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_reload_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(RuntimeEvent::PluginsReloaded { local: 3, remote: 1 });
        match rx.recv().await.unwrap() {
            RuntimeEvent::PluginsReloaded { local, remote } => {
                assert_eq!(local, 3);
                assert_eq!(remote, 1);
            }
        }
    }
}
