//! One-shot settlement notifications.
//!
//! At most one notification is visible at a time. Each published
//! notification auto-clears after a fixed display window, independent of
//! whatever polling produced it; a notification that was replaced in the
//! meantime is left alone by the stale expiry task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub amount_sats: u64,
}

/// Holder for the currently visible notification.
pub struct NotificationCenter {
    current: Arc<Mutex<Option<(u64, Notification)>>>,
    generation: Arc<AtomicU64>,
    ttl: Duration,
}

impl Clone for NotificationCenter {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
            generation: Arc::clone(&self.generation),
            ttl: self.ttl,
        }
    }
}

impl NotificationCenter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            ttl,
        }
    }

    /// Shows `notification`, replacing any prior one, and schedules its
    /// expiry. The expiry only clears the generation it was scheduled for.
    pub fn publish(&self, notification: Notification) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.current.lock().unwrap() = Some((generation, notification));

        let current = Arc::clone(&self.current);
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut slot = current.lock().unwrap();
            if slot.as_ref().is_some_and(|(gen, _)| *gen == generation) {
                slot.take();
                debug!("settlement notification expired");
            }
        });
    }

    pub fn current(&self) -> Option<Notification> {
        self.current.lock().unwrap().as_ref().map(|(_, n)| n.clone())
    }

    pub fn clear(&self) {
        self.current.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paid(amount_sats: u64) -> Notification {
        Notification {
            message: format!("payment received: {} sats", amount_sats),
            amount_sats,
        }
    }

    #[tokio::test]
    async fn test_publish_and_expiry() {
        let center = NotificationCenter::new(Duration::from_millis(30));
        center.publish(paid(5));
        assert_eq!(center.current(), Some(paid(5)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(center.current(), None);
    }

    #[tokio::test]
    async fn test_replacement_survives_stale_expiry() {
        let center = NotificationCenter::new(Duration::from_millis(40));
        center.publish(paid(5));
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Replace before the first TTL elapses; the first expiry task must
        // not clear the replacement.
        center.publish(paid(7));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(center.current(), Some(paid(7)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(center.current(), None);
    }

    #[tokio::test]
    async fn test_manual_clear() {
        let center = NotificationCenter::new(Duration::from_secs(60));
        center.publish(paid(5));
        center.clear();
        assert_eq!(center.current(), None);
    }
}
