use std::sync::Arc;

use super::event::ServerMessage;
use super::registry::ConnectionRegistry;

/// Fan-out of task events to the connections of a single owner.
///
/// Delivery is best-effort: a closed connection is skipped and a publish
/// with no subscribers is not an error.
#[derive(Clone)]
pub struct NotificationBus {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationBus {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send `event` to every connection bound to `owner_id`. Returns how
    /// many connections accepted it.
    pub fn publish(&self, owner_id: i64, event: &ServerMessage) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize push event");
                return 0;
            }
        };

        let senders = self.registry.senders_for(owner_id);
        let mut delivered = 0;
        for tx in senders {
            if tx.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        if delivered == 0 {
            tracing::debug!(owner_id, "push event had no live subscribers");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_publish_reaches_only_owner_scope() {
        let registry = Arc::new(ConnectionRegistry::new());
        let bus = NotificationBus::new(Arc::clone(&registry));

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        let a = registry.register(tx1);
        let b = registry.register(tx2);
        registry.register(tx3);
        registry.bind(a, 1);
        registry.bind(b, 2);

        let delivered = bus.publish(1, &ServerMessage::task_deleted(10, 1));
        assert_eq!(delivered, 1);

        let got: serde_json::Value = serde_json::from_str(&rx1.try_recv().unwrap()).unwrap();
        assert_eq!(got["type"], "task_deleted");
        assert_eq!(got["task_id"], 10);
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_publish_skips_closed_connections() {
        let registry = Arc::new(ConnectionRegistry::new());
        let bus = NotificationBus::new(Arc::clone(&registry));

        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);
        registry.bind(id, 1);
        drop(rx);

        assert_eq!(bus.publish(1, &ServerMessage::task_deleted(1, 1)), 0);
        assert_eq!(bus.publish(7, &ServerMessage::task_deleted(1, 7)), 0);
    }
}
