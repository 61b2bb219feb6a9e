/*!
Error taxonomy shared by the server's HTTP surface and clients.
*/

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Category of a lifecycle operation failure.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, rejected at the boundary.
    Validation,
    /// Authenticated but not allowed to perform this transition.
    Forbidden,
    /// Call or conversation absent.
    NotFound,
    /// Transition illegal from the persisted status. Safe to treat as a no-op.
    Conflict,
    /// The conversation already has a ringing or active call.
    AlreadyInCall,
    /// Storage or server fault.
    Internal,
}

impl ErrorKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::AlreadyInCall => "already_in_call",
            Self::Internal => "internal",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body returned by the HTTP surface on failure.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human readable detail.
    pub message: String,
}
