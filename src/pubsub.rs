//! Channel fan-out for fence events and PUBLISH/SUBSCRIBE.
//!
//! One process-wide broadcast bus carries (channel, payload) envelopes;
//! subscribers filter by channel name or pattern on their own side of the
//! channel. Senders never block: a slow subscriber lags and drops from its
//! own receiver, not from the bus.

use tokio::sync::broadcast;

use crate::glob::Glob;

const BUS_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: String,
    pub payload: String,
}

#[derive(Debug)]
pub struct PubSub {
    bus: broadcast::Sender<Envelope>,
}

impl Default for PubSub {
    fn default() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self { bus }
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish to a named channel. Returns the number of connected
    /// subscribers that could observe the message.
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        let receivers = self.bus.receiver_count();
        if receivers > 0 {
            // send only errs when there are no receivers
            let _ = self.bus.send(Envelope {
                channel: channel.to_string(),
                payload: payload.to_string(),
            });
        }
        metrics::counter!("pubsub_messages_total").increment(1);
        receivers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.bus.subscribe()
    }
}

/// Per-connection subscription set: exact names plus glob patterns.
#[derive(Debug, Default)]
pub struct Subscriptions {
    channels: Vec<String>,
    patterns: Vec<Glob>,
}

impl Subscriptions {
    pub fn add_channel(&mut self, name: &str) {
        if !self.channels.iter().any(|c| c == name) {
            self.channels.push(name.to_string());
        }
    }

    pub fn add_pattern(&mut self, glob: Glob) {
        if !self.patterns.iter().any(|p| p.pattern() == glob.pattern()) {
            self.patterns.push(glob);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty()
    }

    pub fn count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }

    pub fn wants(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
            || self.patterns.iter().any(|p| p.matches(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let pubsub = PubSub::new();
        let mut rx = pubsub.subscribe();
        assert_eq!(pubsub.publish("alerts", "hello"), 1);
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.channel, "alerts");
        assert_eq!(envelope.payload, "hello");
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let pubsub = PubSub::new();
        assert_eq!(pubsub.publish("alerts", "hello"), 0);
    }

    #[test]
    fn subscription_filtering() {
        let mut subs = Subscriptions::default();
        subs.add_channel("alerts");
        subs.add_pattern(Glob::new("fleet:*").unwrap());
        assert!(subs.wants("alerts"));
        assert!(subs.wants("fleet:north"));
        assert!(!subs.wants("other"));
        assert_eq!(subs.count(), 2);

        subs.add_channel("alerts");
        assert_eq!(subs.count(), 2);
    }
}
