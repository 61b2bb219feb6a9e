//! Offer/answer negotiation over one platform peer connection.
//!
//! Remote candidates may arrive before the remote description they belong to.
//! Those are buffered and applied, in receipt order, right after the remote
//! description is set. Every operation runs under one async lock, so a
//! candidate can never slip in between setting the description and flushing.

use std::sync::Arc;

use anyhow::anyhow;
use log::{debug, warn};
use peer_calls_protocol::{IceCandidate, SessionDescription};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::peer::{
    LocalStream, MediaConstraints, MediaDevices, PeerConnection, PeerConnectionFactory,
    PeerConnectionListener, TrackKind,
};
use crate::utils::ConnectionType;

#[derive(Default)]
struct NegotiatorState {
    connection: Option<Arc<dyn PeerConnection>>,
    local_stream: Option<Arc<dyn LocalStream>>,
    pending_candidates: Vec<IceCandidate>,
    remote_description_set: bool,
    /// Set by `close` until the next `create_connection`.
    closed: bool,
}

impl NegotiatorState {
    fn connection(&self) -> Result<Arc<dyn PeerConnection>> {
        self.connection
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| Error::PeerConnection(anyhow!("no peer connection created yet")))
    }

    async fn apply_remote_description(&mut self, description: &SessionDescription) -> Result<()> {
        let connection = self.connection()?;
        connection.set_remote_description(description).await?;
        self.remote_description_set = true;

        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            debug!("applying {} buffered candidate(s)", pending.len());
        }
        for candidate in &pending {
            if let Err(err) = connection.add_ice_candidate(candidate).await {
                warn!("failed to add buffered candidate: {err}");
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.pending_candidates.clear();
        self.remote_description_set = false;
    }
}

pub struct ConnectionNegotiator {
    factory: Arc<dyn PeerConnectionFactory>,
    media: Arc<dyn MediaDevices>,
    connection_type: ConnectionType,
    state: Mutex<NegotiatorState>,
}

impl ConnectionNegotiator {
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        media: Arc<dyn MediaDevices>,
        connection_type: ConnectionType,
    ) -> Self {
        Self {
            factory,
            media,
            connection_type,
            state: Mutex::new(NegotiatorState::default()),
        }
    }

    /// Build a fresh peer connection. A previous one is closed first, together
    /// with its buffered candidates; attached local tracks are added again.
    pub async fn create_connection(&self, listener: Arc<dyn PeerConnectionListener>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.connection.is_some() {
            debug!("replacing existing peer connection");
        }
        state.teardown();
        state.closed = false;

        let connection = self
            .factory
            .create(&self.connection_type.ice_servers(), listener)?;
        if let Some(stream) = &state.local_stream {
            for track in stream.tracks() {
                connection.add_track(track)?;
            }
        }
        state.connection = Some(connection);
        Ok(())
    }

    /// Start capture and add the tracks to the current connection, if any.
    /// Capture that completes after `close` is stopped again and reported as
    /// [`Error::Closed`].
    pub async fn attach_local_media(&self, constraints: MediaConstraints) -> Result<()> {
        let stream = self.media.get_user_media(constraints).await?;
        let mut state = self.state.lock().await;
        if state.closed {
            debug!("negotiator closed during capture, releasing devices");
            stream.stop();
            return Err(Error::Closed);
        }
        if let Some(previous) = state.local_stream.take() {
            previous.stop();
        }
        if let Some(connection) = &state.connection {
            for track in stream.tracks() {
                if let Err(err) = connection.add_track(track) {
                    stream.stop();
                    return Err(err.into());
                }
            }
        }
        state.local_stream = Some(stream);
        Ok(())
    }

    pub async fn create_offer(&self) -> Result<SessionDescription> {
        let state = self.state.lock().await;
        let connection = state.connection()?;
        let offer = connection.create_offer().await?;
        connection.set_local_description(&offer).await?;
        Ok(offer)
    }

    /// Apply the remote offer and return the local answer, already set.
    pub async fn create_answer(&self, remote_offer: &SessionDescription) -> Result<SessionDescription> {
        let mut state = self.state.lock().await;
        state.apply_remote_description(remote_offer).await?;
        let connection = state.connection()?;
        let answer = connection.create_answer().await?;
        connection.set_local_description(&answer).await?;
        Ok(answer)
    }

    pub async fn apply_remote_description(&self, description: &SessionDescription) -> Result<()> {
        self.state
            .lock()
            .await
            .apply_remote_description(description)
            .await
    }

    pub async fn apply_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.remote_description_set {
            if let Some(connection) = state.connection.clone() {
                return Ok(connection.add_ice_candidate(&candidate).await?);
            }
        }
        state.pending_candidates.push(candidate);
        Ok(())
    }

    pub async fn toggle_audio(&self, muted: bool) {
        self.set_tracks_enabled(TrackKind::Audio, !muted).await;
    }

    pub async fn toggle_video(&self, disabled: bool) {
        self.set_tracks_enabled(TrackKind::Video, !disabled).await;
    }

    async fn set_tracks_enabled(&self, kind: TrackKind, enabled: bool) {
        let state = self.state.lock().await;
        if let Some(stream) = &state.local_stream {
            for track in stream.tracks().iter().filter(|t| t.kind() == kind) {
                track.set_enabled(enabled);
            }
        }
    }

    pub async fn has_local_media(&self) -> bool {
        self.state.lock().await.local_stream.is_some()
    }

    pub async fn pending_candidates(&self) -> usize {
        self.state.lock().await.pending_candidates.len()
    }

    /// Stop capture and drop the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(stream) = state.local_stream.take() {
            stream.stop();
        }
        state.teardown();
        state.closed = true;
    }
}
