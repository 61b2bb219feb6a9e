use std::fmt::{self, Display, Formatter};

use peer_calls_protocol::{ErrorBody, ErrorKind};
use thiserror::Error;

use crate::resilience::TerminationReason;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    MediaAccess(#[from] MediaAccessError),

    #[error("signaling failed: {0}")]
    Signaling(String),

    #[error("connection failed: {0}")]
    ConnectionFailure(TerminationReason),

    #[error("peer connection error: {0}")]
    PeerConnection(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The session has no call, or its call already terminated.
    #[error("call session is closed")]
    Closed,
}

/// Why local capture could not be started.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MediaErrorCategory {
    PermissionDenied,
    DeviceNotFound,
    DeviceBusy,
    ConstraintsUnsatisfiable,
    Other,
}

impl MediaErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission-denied",
            Self::DeviceNotFound => "device-not-found",
            Self::DeviceBusy => "device-busy",
            Self::ConstraintsUnsatisfiable => "constraints-unsatisfiable",
            Self::Other => "other",
        }
    }
}

impl Display for MediaErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("media access failed ({category}): {message}")]
pub struct MediaAccessError {
    pub category: MediaErrorCategory,
    pub message: String,
}

impl MediaAccessError {
    pub fn new(category: MediaErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

/// Lifecycle operation rejected by the server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Somebody else already moved the call on, e.g. the peer hung up first.
    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }
}

impl From<ErrorBody> for ApiError {
    fn from(body: ErrorBody) -> Self {
        Self::new(body.kind, body.message)
    }
}
