//! Status notifications from the buffering node.
//!
//! The buffering node reports when it starts or stops collecting elements
//! and blocking output. Reports are queued and drained by the subscriber
//! after each event, never delivered from inside the node's own handler.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A status transition of the buffering node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// At least one collector is pending or active
    Collecting(bool),
    /// Output towards the next handler is held back
    Blocking(bool),
}

#[derive(Debug, Default)]
struct BroadcastState {
    queue: VecDeque<StatusChange>,
    next_token: u64,
    subscriber: Option<u64>,
}

/// Publishing side, owned by the buffering node.
#[derive(Debug, Clone, Default)]
pub struct StatusBroadcaster {
    state: Rc<RefCell<BroadcastState>>,
}

impl StatusBroadcaster {
    /// Create a broadcaster with no subscriber.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a change for the current subscriber. Dropped when nobody listens.
    pub fn notify(&self, change: StatusChange) {
        let mut state = self.state.borrow_mut();
        if state.subscriber.is_some() {
            state.queue.push_back(change);
        }
    }

    /// Subscribe, replacing any previous subscriber.
    pub fn subscribe(&self) -> StatusSubscription {
        let mut state = self.state.borrow_mut();
        state.next_token += 1;
        let token = state.next_token;
        state.subscriber = Some(token);
        state.queue.clear();
        StatusSubscription {
            state: Rc::clone(&self.state),
            token,
        }
    }

    /// Whether someone is subscribed.
    pub fn has_subscriber(&self) -> bool {
        self.state.borrow().subscriber.is_some()
    }
}

/// Receiving side. Dropping it unsubscribes.
#[derive(Debug)]
pub struct StatusSubscription {
    state: Rc<RefCell<BroadcastState>>,
    token: u64,
}

impl StatusSubscription {
    /// Next queued change, if any.
    pub fn next_change(&self) -> Option<StatusChange> {
        let mut state = self.state.borrow_mut();
        if state.subscriber != Some(self.token) {
            return None;
        }
        state.queue.pop_front()
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        if state.subscriber == Some(self.token) {
            state.subscriber = None;
            state.queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subscriber_drops_changes() {
        let broadcaster = StatusBroadcaster::new();
        broadcaster.notify(StatusChange::Collecting(true));
        let subscription = broadcaster.subscribe();
        assert_eq!(subscription.next_change(), None);
    }

    #[test]
    fn test_changes_delivered_in_order() {
        let broadcaster = StatusBroadcaster::new();
        let subscription = broadcaster.subscribe();
        broadcaster.notify(StatusChange::Collecting(true));
        broadcaster.notify(StatusChange::Blocking(true));
        assert_eq!(subscription.next_change(), Some(StatusChange::Collecting(true)));
        assert_eq!(subscription.next_change(), Some(StatusChange::Blocking(true)));
        assert_eq!(subscription.next_change(), None);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broadcaster = StatusBroadcaster::new();
        let subscription = broadcaster.subscribe();
        assert!(broadcaster.has_subscriber());
        drop(subscription);
        assert!(!broadcaster.has_subscriber());
    }

    #[test]
    fn test_new_subscription_supersedes_old() {
        let broadcaster = StatusBroadcaster::new();
        let old = broadcaster.subscribe();
        let new = broadcaster.subscribe();
        broadcaster.notify(StatusChange::Blocking(false));
        assert_eq!(old.next_change(), None);
        drop(old);
        // Dropping the stale handle leaves the live one subscribed
        assert!(broadcaster.has_subscriber());
        assert_eq!(new.next_change(), Some(StatusChange::Blocking(false)));
    }
}
