//! Fire-and-forget notifications towards the UI layer.

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Start,
    Stop,
    Die,
    Restart,
    Destroy,
    Rename,
    Oom,
    HealthStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Notification {
    pub kind: EventKind,
    pub container_id: String,
    pub container_name: String,
    pub message: String,
}

/// Push surface consumed by the transport layer. Delivery failures are the
/// sink's problem; callers never block or fail on a notification.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, kind: EventKind, container_id: &str, container_name: &str, message: &str);
}

/// Broadcast-channel sink; each UI session subscribes to its own receiver.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        BroadcastNotifier { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastNotifier {
    fn notify(&self, kind: EventKind, container_id: &str, container_name: &str, message: &str) {
        // Send fails only when no session is subscribed, which is fine.
        let _ = self.tx.send(Notification {
            kind,
            container_id: container_id.to_string(),
            container_name: container_name.to_string(),
            message: message.to_string(),
        });
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        notifier.notify(EventKind::Start, "abc", "web", "container web started");

        let n1 = rx1.recv().await.unwrap();
        let n2 = rx2.recv().await.unwrap();
        assert_eq!(n1, n2);
        assert_eq!(n1.kind, EventKind::Start);
        assert_eq!(n1.container_name, "web");
    }

    #[test]
    fn notify_without_subscribers_is_a_no_op() {
        let notifier = BroadcastNotifier::new(8);
        notifier.notify(EventKind::Oom, "abc", "web", "oom");
    }
}
