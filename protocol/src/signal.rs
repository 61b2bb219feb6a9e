/*!
Signaling envelope exchanged between the two parties of a call, and the
[`SignalMessage`] enum carried over the websocket between clients and the server.
*/

use serde::{Deserialize, Serialize};

use crate::{CallId, LifecycleEvent, UserId};

/// Whether a session description is an offer or an answer.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Produced by the caller.
    Offer,
    /// Produced by the callee in response to an offer.
    Answer,
}

/// Local or remote media and transport capability description.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    /// Offer or answer.
    pub sdp_type: SdpType,
    /// Raw `SDP` text, passed through without modifications.
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap an `SDP` offer.
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Wrap an `SDP` answer.
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Proposed ICE candidate of one user passed to the other user without modifications.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line.
    pub candidate: String,
    /// Media stream identification tag.
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    pub sdp_m_line_index: Option<u16>,
}

/// Discriminant of a [`Signal`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// `SDP` offer.
    Offer,
    /// `SDP` answer.
    Answer,
    /// ICE candidate.
    Candidate,
}

/// Payload of a signaling envelope.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum Signal {
    /// `SDP` offer that gets passed to the other user without modifications.
    Offer(SessionDescription),
    /// `SDP` answer that gets passed to the other user without modifications.
    Answer(SessionDescription),
    /// Network candidate.
    Candidate(IceCandidate),
}

impl Signal {
    /// Discriminant of the payload.
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        match self {
            Self::Offer(_) => SignalKind::Offer,
            Self::Answer(_) => SignalKind::Answer,
            Self::Candidate(_) => SignalKind::Candidate,
        }
    }
}

/// Call-scoped signaling message addressed to exactly one party of the call.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    /// Call the signal belongs to.
    pub call_id: CallId,
    /// Sender, must match the authenticated identity of the publishing connection.
    pub from_user_id: UserId,
    /// Recipient, subscribers discard envelopes addressed to somebody else.
    pub target_user_id: UserId,
    /// Offer, answer or candidate.
    pub signal: Signal,
}

impl SignalEnvelope {
    /// Discriminant of the carried signal.
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        self.signal.kind()
    }

    /// Whether a subscriber identified as `user` should process this envelope.
    #[must_use]
    pub fn is_addressed_to(&self, user: &UserId) -> bool {
        &self.target_user_id == user
    }
}

/// `Enum` used by clients and the server to communicate over the websocket.
/// Two main categories are messages used to subscribe to a call's signaling
/// channel, and messages pushed by the server afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalMessage {
    /// Client subscribes its connection to the signaling channel of a call.
    CallJoin(CallId),

    /// Client unsubscribes from the signaling channel of a call.
    CallLeave(CallId),

    /// Offer, answer or candidate relayed to the other party without modifications.
    Signal(SignalEnvelope),

    /// Lifecycle notification pushed to a user's notification channel.
    Lifecycle(LifecycleEvent),

    /// Generic error containing detailed information about the cause.
    Error(Option<CallId>, String),
}
