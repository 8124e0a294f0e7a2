//! Fan-out notifications for protocol-layer subscribers.
//!
//! Each subscriber owns a bounded channel; the publisher never blocks. A
//! subscriber that falls behind loses messages rather than stalling
//! consensus, and a dropped receiver unregisters itself on the next publish.

use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use ssix_primitives::types::Hash;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    BlockAdded {
        height: u32,
        hash: Hash,
    },
    ChainSwitched {
        split_height: u32,
        new_tip: Hash,
    },
    TransactionAdded {
        hash: Hash,
    },
    TransactionsRemoved {
        hashes: Vec<Hash>,
    },
}

#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<Vec<Sender<Notification>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, capacity: usize) -> Receiver<Notification> {
        let (sender, receiver) = bounded(capacity.max(1));
        self.subscribers.lock().expect("subscriber lock").push(sender);
        receiver
    }

    pub fn publish(&self, notification: Notification) {
        let mut subscribers = self.subscribers.lock().expect("subscriber lock");
        subscribers.retain(|sender| {
            match sender.try_send(notification.clone()) {
                Ok(()) => true,
                // Slow subscriber: the message is lost, the channel stays.
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_a_publish() {
        let broadcaster = Broadcaster::new();
        let a = broadcaster.subscribe(4);
        let b = broadcaster.subscribe(4);

        let note = Notification::BlockAdded {
            height: 5,
            hash: Hash([1; 32]),
        };
        broadcaster.publish(note.clone());
        assert_eq!(a.try_recv().unwrap(), note);
        assert_eq!(b.try_recv().unwrap(), note);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let broadcaster = Broadcaster::new();
        let receiver = broadcaster.subscribe(1);
        drop(receiver);
        broadcaster.publish(Notification::TransactionAdded {
            hash: Hash([2; 32]),
        });
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn full_channel_drops_the_message_not_the_subscriber() {
        let broadcaster = Broadcaster::new();
        let receiver = broadcaster.subscribe(1);
        let first = Notification::TransactionAdded { hash: Hash([3; 32]) };
        broadcaster.publish(first.clone());
        broadcaster.publish(Notification::TransactionAdded { hash: Hash([4; 32]) });
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert_eq!(receiver.try_recv().unwrap(), first);
        assert!(receiver.try_recv().is_err());
    }
}
