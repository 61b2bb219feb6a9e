/*!
Call record model shared by the lifecycle server and its clients.
*/

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CallId, ConversationId, UserId};

/// Media kind requested when a call is initiated.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// Audio only.
    Voice,
    /// Audio and camera video.
    Video,
}

impl CallType {
    /// Wire name of the call type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Video => "video",
        }
    }
}

impl FromStr for CallType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voice" => Ok(Self::Voice),
            "video" => Ok(Self::Video),
            other => Err(format!("invalid call type: {other}")),
        }
    }
}

impl Display for CallType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative status of a call.
///
/// ```text
///   ringing --answer--> active
///   ringing --decline--> declined
///   ringing --missed--> missed
///   ringing --end--> ended
///   ringing --failure--> failed
///   active  --end--> ended
///   active  --failure--> failed
/// ```
///
/// `declined`, `missed`, `ended` and `failed` are terminal.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Offered to the receiver, not answered yet.
    Ringing,
    /// Answered; media is being negotiated or flowing.
    Active,
    /// Rejected by the receiver.
    Declined,
    /// Hung up by either party.
    Ended,
    /// Nobody answered within the ring window.
    Missed,
    /// Signaling or connection failure, see `Call::error_reason`.
    Failed,
}

impl CallStatus {
    /// All statuses, in graph order.
    pub const ALL: [Self; 6] = [
        Self::Ringing,
        Self::Active,
        Self::Declined,
        Self::Ended,
        Self::Missed,
        Self::Failed,
    ];

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Active => "active",
            Self::Declined => "declined",
            Self::Ended => "ended",
            Self::Missed => "missed",
            Self::Failed => "failed",
        }
    }

    /// No transition leaves a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Declined | Self::Ended | Self::Missed | Self::Failed
        )
    }

    /// Ringing and active calls count against the one-live-call-per-conversation rule.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is an edge of the call state graph.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Ringing,
                Self::Active | Self::Declined | Self::Missed | Self::Ended | Self::Failed
            ) | (Self::Active, Self::Ended | Self::Failed)
        )
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParseCallStatusError(pub String);

impl Display for ParseCallStatusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid call status: {}", self.0)
    }
}

impl std::error::Error for ParseCallStatusError {}

impl FromStr for CallStatus {
    type Err = ParseCallStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseCallStatusError(s.to_owned()))
    }
}

impl Display for CallStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One voice/video session attempt between the two members of a conversation.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    /// Call identifier.
    pub id: CallId,
    /// Conversation the call belongs to.
    pub conversation_id: ConversationId,
    /// User who started the call.
    pub initiator_id: UserId,
    /// The other conversation member, fixed when the call is created.
    pub receiver_id: UserId,
    /// Requested media.
    pub call_type: CallType,
    /// Current status.
    pub status: CallStatus,
    /// Set when the call becomes active.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the call reaches a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Only set on `failed`.
    pub error_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last status change.
    pub updated_at: DateTime<Utc>,
}

impl Call {
    /// Build a freshly initiated, ringing call.
    #[must_use]
    pub fn ringing(
        id: CallId,
        conversation_id: ConversationId,
        initiator_id: UserId,
        receiver_id: UserId,
        call_type: CallType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            initiator_id,
            receiver_id,
            call_type,
            status: CallStatus::Ringing,
            started_at: None,
            ended_at: None,
            error_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Initiator or receiver.
    #[must_use]
    pub fn is_party(&self, user: &UserId) -> bool {
        &self.initiator_id == user || &self.receiver_id == user
    }

    /// The other party of the call, `None` if `user` is not a party.
    #[must_use]
    pub fn peer_of(&self, user: &UserId) -> Option<&UserId> {
        if &self.initiator_id == user {
            Some(&self.receiver_id)
        } else if &self.receiver_id == user {
            Some(&self.initiator_id)
        } else {
            None
        }
    }
}

/// Append-only audit row recording when a user joined and left a call.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallParticipant {
    /// Row identifier.
    pub id: String,
    /// Owning call.
    pub call_id: CallId,
    /// Participant.
    pub user_id: UserId,
    /// Time the user joined: call creation for the initiator, answer for the receiver.
    pub joined_at: DateTime<Utc>,
    /// Time the call ended for this user.
    pub left_at: Option<DateTime<Utc>>,
}
