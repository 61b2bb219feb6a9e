//! Call-scoped relay of offers, answers and candidates between the two parties.
//!
//! Envelopes are checked against the call record, then fanned out on the
//! call's topic. Nothing is acknowledged, retried, stored or replayed.

use std::sync::Arc;

use log::{debug, warn};
use peer_calls_protocol::{Call, CallId, SignalEnvelope, SignalMessage, UserId};

use crate::error::SignalingError;
use crate::pubsub::{PubSub, Subscriber, SubscriberId, Topic};
use crate::store::CallStore;

#[derive(Clone)]
pub struct SignalingRelay {
    hub: PubSub,
    store: Arc<dyn CallStore>,
}

impl SignalingRelay {
    pub fn new(hub: PubSub, store: Arc<dyn CallStore>) -> Self {
        Self { hub, store }
    }

    /// Subscribe a connection of `user_id` to the signaling channel of a live call.
    pub async fn join(
        &self,
        user_id: &UserId,
        call_id: &CallId,
        id: SubscriberId,
        subscriber: Subscriber,
    ) -> Result<(), SignalingError> {
        let call = self.live_call(call_id).await?;
        if !call.is_party(user_id) {
            return Err(SignalingError::NotAParty(user_id.to_string()));
        }
        self.hub
            .subscribe(Topic::Call(call_id.clone()), id, subscriber)
            .await;
        debug!("connection {id} of {user_id} joined signaling of call {call_id}");
        Ok(())
    }

    pub async fn leave(&self, call_id: &CallId, id: SubscriberId) {
        self.hub.unsubscribe(&Topic::Call(call_id.clone()), id).await;
    }

    /// Validate an envelope sent by `sender` and fan it out to the call's
    /// subscribers. Returns how many connections it was handed to.
    pub async fn publish(
        &self,
        sender: &UserId,
        envelope: SignalEnvelope,
    ) -> Result<usize, SignalingError> {
        if &envelope.from_user_id != sender {
            return Err(SignalingError::SenderMismatch {
                claimed: envelope.from_user_id.to_string(),
                actual: sender.to_string(),
            });
        }
        if envelope.from_user_id == envelope.target_user_id {
            return Err(SignalingError::SelfAddressed);
        }
        let call = self.live_call(&envelope.call_id).await?;
        for user in [&envelope.from_user_id, &envelope.target_user_id] {
            if !call.is_party(user) {
                return Err(SignalingError::NotAParty(user.to_string()));
            }
        }

        let topic = Topic::Call(envelope.call_id.clone());
        debug!(
            "relaying {:?} for call {} from {} to {}",
            envelope.kind(),
            envelope.call_id,
            envelope.from_user_id,
            envelope.target_user_id
        );
        Ok(self.hub.publish(&topic, &SignalMessage::Signal(envelope)).await)
    }

    /// [`Self::publish`] for callers that have nobody to report to: a rejected
    /// envelope is logged and dropped.
    pub async fn forward(&self, sender: &UserId, envelope: SignalEnvelope) {
        let call_id = envelope.call_id.clone();
        if let Err(err) = self.publish(sender, envelope).await {
            warn!("dropped signal from {sender} for call {call_id}: {err}");
        }
    }

    async fn live_call(&self, call_id: &CallId) -> Result<Call, SignalingError> {
        let call = self
            .store
            .get_call(call_id)
            .await
            .map_err(|err| SignalingError::Store(err.to_string()))?
            .ok_or_else(|| SignalingError::UnknownCall(call_id.clone()))?;
        if !call.status.is_live() {
            return Err(SignalingError::CallNotLive(call_id.clone(), call.status));
        }
        Ok(call)
    }
}

/// Whether a message fanned out on a topic should reach the connection of `user_id`.
/// Signaling envelopes go only to their target; everything else is delivered.
pub fn is_deliverable(message: &SignalMessage, user_id: &UserId) -> bool {
    match message {
        SignalMessage::Signal(envelope) => envelope.is_addressed_to(user_id),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use peer_calls_protocol::{
        Call, CallParticipant, CallStatus, CallType, SessionDescription, Signal, SignalEnvelope,
        SignalMessage, UserId,
    };
    use tokio::sync::mpsc;

    use super::{is_deliverable, SignalingRelay};
    use crate::error::SignalingError;
    use crate::pubsub::{PubSub, SubscriberId, Topic};
    use crate::store::{CallStore, MemoryCallStore, StatusChange};

    async fn relay_with_call() -> (SignalingRelay, PubSub, Arc<MemoryCallStore>) {
        let store = Arc::new(MemoryCallStore::new());
        let now = Utc::now();
        let call = Call::ringing(
            "call-1".into(),
            "conv".into(),
            "alice".into(),
            "bob".into(),
            CallType::Video,
            now,
        );
        let initiator = CallParticipant {
            id: "p1".to_owned(),
            call_id: "call-1".into(),
            user_id: "alice".into(),
            joined_at: now,
            left_at: None,
        };
        store.create_call(call, initiator).await.unwrap();
        let hub = PubSub::new();
        (SignalingRelay::new(hub.clone(), store.clone()), hub, store)
    }

    fn offer(from: &str, to: &str) -> SignalEnvelope {
        SignalEnvelope {
            call_id: "call-1".into(),
            from_user_id: from.into(),
            target_user_id: to.into(),
            signal: Signal::Offer(SessionDescription::offer("v=0")),
        }
    }

    #[tokio::test]
    async fn envelope_reaches_joined_target() {
        let (relay, _hub, _store) = relay_with_call().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay
            .join(&"bob".into(), &"call-1".into(), SubscriberId::next(), tx)
            .await
            .unwrap();

        assert_eq!(relay.publish(&"alice".into(), offer("alice", "bob")).await, Ok(1));
        let message = rx.recv().await.unwrap();
        assert!(is_deliverable(&message, &"bob".into()));
        assert!(!is_deliverable(&message, &"alice".into()));
        assert_eq!(message, SignalMessage::Signal(offer("alice", "bob")));
    }

    #[tokio::test]
    async fn misdirected_envelopes_are_rejected() {
        let (relay, _hub, _store) = relay_with_call().await;
        let alice: UserId = "alice".into();

        assert!(matches!(
            relay.publish(&alice, offer("bob", "alice")).await,
            Err(SignalingError::SenderMismatch { .. })
        ));
        assert_eq!(
            relay.publish(&alice, offer("alice", "alice")).await,
            Err(SignalingError::SelfAddressed)
        );
        assert_eq!(
            relay.publish(&alice, offer("alice", "mallory")).await,
            Err(SignalingError::NotAParty("mallory".to_owned()))
        );

        let mut unknown = offer("alice", "bob");
        unknown.call_id = "call-2".into();
        assert_eq!(
            relay.publish(&alice, unknown).await,
            Err(SignalingError::UnknownCall("call-2".into()))
        );
    }

    #[tokio::test]
    async fn outsiders_cannot_join() {
        let (relay, _hub, _store) = relay_with_call().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = relay
            .join(&"mallory".into(), &"call-1".into(), SubscriberId::next(), tx)
            .await
            .unwrap_err();
        assert_eq!(err, SignalingError::NotAParty("mallory".to_owned()));
    }

    #[tokio::test]
    async fn nothing_is_delivered_after_teardown() {
        let (relay, hub, store) = relay_with_call().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay
            .join(&"bob".into(), &"call-1".into(), SubscriberId::next(), tx)
            .await
            .unwrap();

        store
            .update_status_if(
                &"call-1".into(),
                &[CallStatus::Ringing],
                StatusChange::new(CallStatus::Ended, Utc::now()),
            )
            .await
            .unwrap()
            .unwrap();
        hub.close_topic(&Topic::Call("call-1".into())).await;

        assert_eq!(
            relay.publish(&"alice".into(), offer("alice", "bob")).await,
            Err(SignalingError::CallNotLive("call-1".into(), CallStatus::Ended))
        );
        // The sender half was dropped with the topic.
        assert_eq!(rx.recv().await, None);
    }
}
