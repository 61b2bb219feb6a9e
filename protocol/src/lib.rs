/*!
Helper crate that declares common types and structures shared between
[peer-calls](../peer_calls/index.html) clients and the
[peer-calls-server](../peer_calls_server/index.html).

It holds the call record model, the signaling envelope relayed between the two
parties of a call, lifecycle events the server publishes on every state change,
and the [`SignalMessage`] enum carried over the websocket.
*/

#![warn(missing_docs)]

use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod call;
pub mod error;
pub mod events;
pub mod signal;

pub use call::{Call, CallParticipant, CallStatus, CallType, ParseCallStatusError};
pub use error::{ErrorBody, ErrorKind};
pub use events::{LifecycleEvent, LifecycleEventKind};
pub use signal::{IceCandidate, SdpType, SessionDescription, Signal, SignalEnvelope, SignalKind, SignalMessage};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Wrap String into a `", stringify!($name), "` `struct`")]
            #[must_use]
            pub const fn new(inner: String) -> Self {
                Self(inner)
            }

            /// Return reference to the underling string
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Acquire the underlying type
            #[must_use]
            #[allow(clippy::missing_const_for_fn)]
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether the identifier is empty or whitespace only.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl FromStr for $name {
            type Err = Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Opaque identifier of a call, generated by the server on creation.
    CallId
);

string_id!(
    /// Identifier of an authenticated chat user.
    UserId
);

string_id!(
    /// Identifier of the conversation a call belongs to.
    ConversationId
);

#[cfg(test)]
mod tests {
    use super::{CallId, UserId};

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = CallId::new("c-1".to_owned());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c-1\"");
        let user: UserId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(user.as_str(), "alice");
    }

    #[test]
    fn blank_ids_are_detected() {
        assert!(UserId::from("  ").is_blank());
        assert!(!UserId::from("bob").is_blank());
    }
}
