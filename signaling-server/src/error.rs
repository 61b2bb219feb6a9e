use peer_calls_protocol::{CallId, CallStatus, ConversationId, ErrorBody, ErrorKind};
use thiserror::Error;

pub type Result<T, E = CallError> = std::result::Result<T, E>;

/// Failure of a lifecycle operation, returned synchronously to its caller.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("call {call_id} is {current}, cannot {attempted}")]
    Conflict {
        call_id: CallId,
        current: CallStatus,
        attempted: &'static str,
    },

    #[error("conversation {0} already has a call in progress")]
    AlreadyInCall(ConversationId),

    #[error("call store failure: {0}")]
    Store(#[from] StoreError),
}

impl CallError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::AlreadyInCall(_) => ErrorKind::AlreadyInCall,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation {0} already has a live call")]
    LiveCallExists(ConversationId),

    #[error("user {user_id} already joined call {call_id}")]
    DuplicateParticipant { call_id: CallId, user_id: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Malformed or misdirected signaling. Dropped and logged at the relay, never fatal to the call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalingError {
    #[error("unknown call {0}")]
    UnknownCall(CallId),

    #[error("call {0} is {1}, signaling closed")]
    CallNotLive(CallId, CallStatus),

    #[error("envelope claims sender {claimed} but connection belongs to {actual}")]
    SenderMismatch { claimed: String, actual: String },

    #[error("user {0} is not a party of the call")]
    NotAParty(String),

    #[error("envelope addressed to its own sender")]
    SelfAddressed,

    #[error("store unavailable: {0}")]
    Store(String),
}
