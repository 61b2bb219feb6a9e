//! Fire-and-forget fan-out between server components and websocket connections.
//!
//! Delivery is at most once: a message published while nobody is subscribed to
//! its topic is gone, and nothing is ever replayed to late subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use peer_calls_protocol::{CallId, SignalMessage, UserId};
use tokio::sync::{mpsc, RwLock};

/// Channel a message is published on.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Topic {
    /// Lifecycle notifications of one user.
    User(UserId),
    /// Signaling between the two parties of one call.
    Call(CallId),
}

/// Identifies one subscribed connection across all of its topics.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SubscriberId(u64);

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

impl SubscriberId {
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type Subscriber = mpsc::UnboundedSender<SignalMessage>;

type Topics = HashMap<Topic, HashMap<SubscriberId, Subscriber>>;

#[derive(Default, Clone)]
pub struct PubSub {
    topics: Arc<RwLock<Topics>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, topic: Topic, id: SubscriberId, subscriber: Subscriber) {
        self.topics
            .write()
            .await
            .entry(topic)
            .or_default()
            .insert(id, subscriber);
    }

    pub async fn unsubscribe(&self, topic: &Topic, id: SubscriberId) {
        let mut topics = self.topics.write().await;
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Drop `id` from every topic, used when its connection goes away.
    pub async fn unsubscribe_all(&self, id: SubscriberId) {
        let mut topics = self.topics.write().await;
        for subscribers in topics.values_mut() {
            subscribers.remove(&id);
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Send `message` to every current subscriber of `topic` and return how
    /// many received it. Subscribers whose receiving end is gone are pruned.
    pub async fn publish(&self, topic: &Topic, message: &SignalMessage) -> usize {
        let mut closed = Vec::new();
        let mut delivered = 0;
        {
            let topics = self.topics.read().await;
            let Some(subscribers) = topics.get(topic) else {
                debug!("no subscribers on {:?}, message dropped", topic);
                return 0;
            };
            for (id, subscriber) in subscribers {
                if subscriber.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(*id);
                }
            }
        }
        for id in closed {
            self.unsubscribe(topic, id).await;
        }
        delivered
    }

    /// Remove the topic with all its subscribers. Later publishes reach nobody.
    pub async fn close_topic(&self, topic: &Topic) {
        if self.topics.write().await.remove(topic).is_some() {
            debug!("closed topic {:?}", topic);
        }
    }

    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.read().await.get(topic).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use peer_calls_protocol::SignalMessage;
    use tokio::sync::mpsc;

    use super::{PubSub, SubscriberId, Topic};

    fn error_message(text: &str) -> SignalMessage {
        SignalMessage::Error(None, text.to_owned())
    }

    #[tokio::test]
    async fn publish_fans_out_in_order() {
        let hub = PubSub::new();
        let topic = Topic::Call("c1".into());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.subscribe(topic.clone(), SubscriberId::next(), tx_a).await;
        hub.subscribe(topic.clone(), SubscriberId::next(), tx_b).await;

        assert_eq!(hub.publish(&topic, &error_message("one")).await, 2);
        assert_eq!(hub.publish(&topic, &error_message("two")).await, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await, Some(error_message("one")));
            assert_eq!(rx.recv().await, Some(error_message("two")));
        }
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_messages() {
        let hub = PubSub::new();
        let topic = Topic::User("bob".into());
        assert_eq!(hub.publish(&topic, &error_message("early")).await, 0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe(topic.clone(), SubscriberId::next(), tx).await;
        hub.publish(&topic, &error_message("late")).await;
        assert_eq!(rx.recv().await, Some(error_message("late")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_topic_and_dropped_receivers_are_pruned() {
        let hub = PubSub::new();
        let topic = Topic::Call("c1".into());
        let (tx, rx) = mpsc::unbounded_channel();
        hub.subscribe(topic.clone(), SubscriberId::next(), tx).await;
        drop(rx);
        assert_eq!(hub.publish(&topic, &error_message("x")).await, 0);
        assert_eq!(hub.subscriber_count(&topic).await, 0);

        let (tx, _rx) = mpsc::unbounded_channel();
        hub.subscribe(topic.clone(), SubscriberId::next(), tx).await;
        hub.close_topic(&topic).await;
        assert_eq!(hub.publish(&topic, &error_message("y")).await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_all_removes_connection_everywhere() {
        let hub = PubSub::new();
        let id = SubscriberId::next();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.subscribe(Topic::User("a".into()), id, tx.clone()).await;
        hub.subscribe(Topic::Call("c".into()), id, tx).await;
        hub.unsubscribe_all(id).await;
        assert_eq!(hub.subscriber_count(&Topic::User("a".into())).await, 0);
        assert_eq!(hub.subscriber_count(&Topic::Call("c".into())).await, 0);
    }
}
