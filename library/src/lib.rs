/*!
Client side of peer-to-peer voice and video calls.

# Overview

Setting up a call between two peers takes more than an offer and an answer:
candidates race the descriptions they belong to, connections drop and come
back, and every way out of a call has to release the camera and microphone.
This crate handles that, on top of whatever `WebRTC` stack and server API the
application provides through a handful of traits.

A [`CallSession`] drives one call end to end. It owns a [`ConnectionNegotiator`]
that performs offer/answer exchange and buffers early candidates, a
[`ResilienceMonitor`] that rides out short disconnects and fails the call on
lasting ones, and feeds a [`CallUiStore`] that the presentation layer observes.

The server counterpart lives in the `peer-calls-server` crate; both speak the
types of `peer-calls-protocol`.

In-memory implementations of every platform trait are available in [`testing`].
*/

#![allow(clippy::module_name_repetitions)]
// clippy WARN level lints
#![warn(
    clippy::cargo,
    clippy::pedantic,
    clippy::dbg_macro,
    clippy::unwrap_used,
    clippy::integer_division,
    clippy::large_include_file,
    clippy::map_err_ignore,
    clippy::panic,
    clippy::todo,
    clippy::undocumented_unsafe_blocks,
    clippy::unimplemented,
    clippy::unreachable
)]
// clippy WARN level lints, that can be upgraded to DENY if preferred
#![warn(
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::empty_drop,
    clippy::exit,
    clippy::if_then_some_else_none,
    clippy::indexing_slicing,
    clippy::let_underscore_must_use,
    clippy::string_slice,
    clippy::try_err
)]
// clippy DENY level lints, they always have a quick fix that should be preferred
#![deny(
    clippy::wildcard_imports,
    clippy::multiple_inherent_impl,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_name_method,
    clippy::self_named_module_files,
    clippy::string_add,
    clippy::unnecessary_self_imports,
    clippy::verbose_file_reads
)]

pub mod api;
mod error;
pub mod negotiator;
pub mod peer;
pub mod resilience;
pub mod session;
pub mod testing;
pub mod timer;
pub mod ui_state;
mod utils;

pub use api::{CallApi, SignalingTransport};
pub use error::{ApiError, Error, MediaAccessError, MediaErrorCategory, Result};
pub use negotiator::ConnectionNegotiator;
pub use peer_calls_protocol::{CallId, ConversationId, UserId};
pub use resilience::{MonitorSignal, ReconnectPolicy, ResilienceMonitor, TerminationReason};
pub use session::{CallSession, SessionConfig, SessionDeps};
pub use ui_state::{CallPhase, CallUiState, CallUiStore};
pub use utils::{ConnectionType, IceServer};
