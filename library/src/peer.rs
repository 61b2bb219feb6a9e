//! Platform seams: the peer connection and the capture API.
//!
//! Real applications implement these over their WebRTC stack. In-memory
//! implementations live in [`crate::testing`].

use std::sync::Arc;

use async_trait::async_trait;
use peer_calls_protocol::{CallType, IceCandidate, SessionDescription};

use crate::error::MediaAccessError;
use crate::utils::IceServer;

/// Connection state reported by the platform peer connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub const fn for_call(call_type: CallType) -> Self {
        Self {
            audio: true,
            video: matches!(call_type, CallType::Video),
        }
    }
}

pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Release the underlying capture device.
    fn stop(&self);
}

pub trait LocalStream: Send + Sync {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    fn stop(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Arc<dyn LocalStream>, MediaAccessError>;
}

/// Media received from the other party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
    pub kinds: Vec<TrackKind>,
}

/// Callback slots of a peer connection, fixed at construction.
pub trait PeerConnectionListener: Send + Sync {
    fn on_candidate(&self, candidate: IceCandidate);
    fn on_connection_state_change(&self, state: PeerConnectionState);
    fn on_remote_stream(&self, stream: RemoteStream);
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> anyhow::Result<SessionDescription>;
    async fn create_answer(&self) -> anyhow::Result<SessionDescription>;
    async fn set_local_description(&self, description: &SessionDescription) -> anyhow::Result<()>;
    async fn set_remote_description(&self, description: &SessionDescription)
        -> anyhow::Result<()>;
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> anyhow::Result<()>;
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> anyhow::Result<()>;
    fn close(&self);
}

pub trait PeerConnectionFactory: Send + Sync {
    fn create(
        &self,
        ice_servers: &[IceServer],
        listener: Arc<dyn PeerConnectionListener>,
    ) -> anyhow::Result<Arc<dyn PeerConnection>>;
}
