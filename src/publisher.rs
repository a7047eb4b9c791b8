use std::sync::RwLock;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events::WorkspaceEvent;

/// Non-blocking fan-out publisher: every subscriber gets its own bounded
/// channel, and a full channel drops the message for that subscriber only
/// rather than blocking the publisher or any other subscriber.
pub struct Publisher {
    subscribers: RwLock<Vec<(Uuid, mpsc::Sender<WorkspaceEvent>)>>,
    buffer: usize,
}

impl Publisher {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            buffer,
        }
    }

    /// Registers a new subscriber and returns its id plus receiving end.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<WorkspaceEvent>) {
        self.subscribe_with(|| None)
    }

    /// Like `subscribe`, but `initial` is evaluated while the new channel is
    /// not yet reachable from `publish`, so a caller can hand the new
    /// subscriber a snapshot event (e.g. current VCS status) without racing a
    /// concurrent publish to the same subscriber.
    pub fn subscribe_with(
        &self,
        initial: impl FnOnce() -> Option<WorkspaceEvent>,
    ) -> (Uuid, mpsc::Receiver<WorkspaceEvent>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        if let Some(event) = initial() {
            let _ = tx.try_send(event);
        }
        let id = Uuid::new_v4();
        self.subscribers.write().unwrap().push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.write().unwrap().retain(|(sid, _)| *sid != id);
    }

    /// Publishes to every subscriber without blocking; a subscriber whose
    /// channel is currently full silently loses this message.
    pub fn publish(&self, event: WorkspaceEvent) {
        let subs = self.subscribers.read().unwrap();
        for (id, tx) in subs.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event.clone()) {
                log::warn!("subscriber {id} channel full, dropping event");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FileChangeEvent, WorkspaceEvent};

    #[tokio::test]
    async fn delivers_to_subscriber() {
        let pub_ = Publisher::new(4);
        let (_id, mut rx) = pub_.subscribe();
        pub_.publish(WorkspaceEvent::FileChange(FileChangeEvent {
            timestamp: 0,
            path: "a".into(),
            operation: "refresh".into(),
        }));
        let got = rx.recv().await;
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn full_channel_drops_without_blocking() {
        let pub_ = Publisher::new(1);
        let (_id, mut rx) = pub_.subscribe();
        for _ in 0..5 {
            pub_.publish(WorkspaceEvent::FileChange(FileChangeEvent {
                timestamp: 0,
                path: "a".into(),
                operation: "refresh".into(),
            }));
        }
        // Only the first message (buffered) should be retrievable; the rest
        // were dropped rather than queued or blocking the publisher above.
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn unsubscribe_removes_entry() {
        let pub_ = Publisher::new(4);
        let (id, _rx) = pub_.subscribe();
        assert_eq!(pub_.subscriber_count(), 1);
        pub_.unsubscribe(id);
        assert_eq!(pub_.subscriber_count(), 0);
    }
}
