/*!
Lifecycle notifications published by the server on every call status change.
*/

use serde::{Deserialize, Serialize};

use crate::{Call, CallId, CallStatus, ConversationId, UserId};

/// Kind of a lifecycle notification, one per status the call can enter.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// A new call is ringing.
    CallRinging,
    /// The receiver answered.
    CallAnswered,
    /// The receiver declined.
    CallDeclined,
    /// A party hung up.
    CallEnded,
    /// Nobody answered in time.
    CallMissed,
    /// The call failed, see `Call::error_reason`.
    CallFailed,
}

impl LifecycleEventKind {
    /// The notification emitted when a call enters `status`.
    #[must_use]
    pub const fn for_status(status: CallStatus) -> Self {
        match status {
            CallStatus::Ringing => Self::CallRinging,
            CallStatus::Active => Self::CallAnswered,
            CallStatus::Declined => Self::CallDeclined,
            CallStatus::Ended => Self::CallEnded,
            CallStatus::Missed => Self::CallMissed,
            CallStatus::Failed => Self::CallFailed,
        }
    }

    /// Whether the notification reports a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::CallRinging | Self::CallAnswered)
    }
}

/// Notification addressed to a user's channel after a call changed status.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    /// What happened.
    pub kind: LifecycleEventKind,
    /// Affected call.
    pub call_id: CallId,
    /// Conversation of the call.
    pub conversation_id: ConversationId,
    /// User whose action caused the change, `None` when the server expired the call itself.
    pub actor_user_id: Option<UserId>,
    /// Call record right after the change.
    pub call: Call,
}

impl LifecycleEvent {
    /// Describe the transition that left `call` in its current status.
    #[must_use]
    pub fn new(call: Call, actor_user_id: Option<UserId>) -> Self {
        Self {
            kind: LifecycleEventKind::for_status(call.status),
            call_id: call.id.clone(),
            conversation_id: call.conversation_id.clone(),
            actor_user_id,
            call,
        }
    }

    /// Whether `user` caused this event.
    #[must_use]
    pub fn is_authored_by(&self, user: &UserId) -> bool {
        self.actor_user_id.as_ref() == Some(user)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{LifecycleEvent, LifecycleEventKind};
    use crate::{Call, CallStatus, CallType};

    #[test]
    fn event_kind_follows_call_status() {
        let mut call = Call::ringing(
            "c".into(),
            "conv".into(),
            "alice".into(),
            "bob".into(),
            CallType::Video,
            Utc::now(),
        );
        call.status = CallStatus::Declined;
        let event = LifecycleEvent::new(call, Some("bob".into()));
        assert_eq!(event.kind, LifecycleEventKind::CallDeclined);
        assert!(event.kind.is_terminal());
        assert!(event.is_authored_by(&"bob".into()));
        assert_eq!(
            serde_json::to_value(&event).unwrap()["kind"],
            "call_declined"
        );
    }
}
