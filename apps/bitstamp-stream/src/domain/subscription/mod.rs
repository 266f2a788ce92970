//! Subscription Tracking
//!
//! Keeps the channels a caller wants to receive so they can be replayed
//! onto a freshly constructed client after a reconnect.
//!
//! Order is preserved: channels are re-subscribed in the order they were
//! first requested. Duplicate requests are collapsed.

// =============================================================================
// Types
// =============================================================================

/// A channel name such as `live_trades_btcusd`.
pub type Channel = String;

/// Insertion-ordered, de-duplicated set of channel names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    channels: Vec<Channel>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    /// Add a channel. Returns `false` if it was already present.
    pub fn insert(&mut self, channel: impl Into<Channel>) -> bool {
        let channel = channel.into();
        if self.contains(&channel) {
            return false;
        }
        self.channels.push(channel);
        true
    }

    /// Remove a channel. Returns `false` if it was not present.
    pub fn remove(&mut self, channel: &str) -> bool {
        let before = self.channels.len();
        self.channels.retain(|c| c != channel);
        self.channels.len() != before
    }

    /// Whether the channel is tracked.
    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    /// Number of tracked channels.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is tracked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Iterate in first-requested order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    /// Channels as a slice, in first-requested order.
    #[must_use]
    pub fn as_slice(&self) -> &[Channel] {
        &self.channels
    }
}

impl<S: Into<Channel>> FromIterator<S> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

impl<S: Into<Channel>> Extend<S> for SubscriptionSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for channel in iter {
            self.insert(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_by_default() {
        let set = SubscriptionSet::default();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn insert_collapses_duplicates() {
        let mut set = SubscriptionSet::new();
        assert!(set.insert("live_trades_btcusd"));
        assert!(!set.insert("live_trades_btcusd"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn preserves_first_requested_order() {
        let set: SubscriptionSet = ["b", "a", "b", "c"].into_iter().collect();
        let order: Vec<&str> = set.iter().collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn remove_reports_presence() {
        let mut set: SubscriptionSet = ["a", "b"].into_iter().collect();
        assert!(set.remove("a"));
        assert!(!set.remove("a"));
        assert!(!set.contains("a"));
        assert!(set.contains("b"));
    }

    #[test]
    fn extend_appends_new_channels_only() {
        let mut set: SubscriptionSet = ["a"].into_iter().collect();
        set.extend(["a", "b"]);
        assert_eq!(set.as_slice(), &["a".to_string(), "b".to_string()]);
    }
}
