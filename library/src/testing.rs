//! In-memory implementations of the platform and server seams, for tests and
//! for exercising call flows without a media stack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use peer_calls_protocol::{
    Call, CallId, CallStatus, CallType, ConversationId, ErrorKind, IceCandidate,
    SessionDescription, SignalEnvelope, UserId,
};
use uuid::Uuid;

use crate::api::{CallApi, SignalingTransport};
use crate::error::{ApiError, MediaAccessError, MediaErrorCategory};
use crate::peer::{
    LocalStream, MediaConstraints, MediaDevices, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerConnectionListener, PeerConnectionState, RemoteStream, TrackKind,
};
use crate::utils::IceServer;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct FakeStream {
    tracks: Vec<Arc<FakeTrack>>,
}

impl FakeStream {
    pub fn tracks_of(&self, kind: TrackKind) -> Vec<Arc<FakeTrack>> {
        self.tracks
            .iter()
            .filter(|t| t.kind == kind)
            .map(Arc::clone)
            .collect()
    }

    /// Every capture device of the stream has been released.
    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(|t| t.is_stopped())
    }
}

impl LocalStream for FakeStream {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn MediaTrack>)
            .collect()
    }
}

/// Capture API handing out fake streams, or a configured failure.
#[derive(Debug, Default)]
pub struct FakeMediaDevices {
    failure: Mutex<Option<MediaErrorCategory>>,
    delay: Mutex<Option<Duration>>,
    streams: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, category: MediaErrorCategory) {
        *lock(&self.failure) = Some(category);
    }

    /// Make every capture take `delay`, like a pending permission prompt.
    pub fn delay_capture(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn last_stream(&self) -> Option<Arc<FakeStream>> {
        lock(&self.streams).last().map(Arc::clone)
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Arc<dyn LocalStream>, MediaAccessError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(category) = *lock(&self.failure) {
            return Err(MediaAccessError::new(category, "capture refused"));
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(FakeTrack::new(TrackKind::Audio)));
        }
        if constraints.video {
            tracks.push(Arc::new(FakeTrack::new(TrackKind::Video)));
        }
        let stream = Arc::new(FakeStream { tracks });
        lock(&self.streams).push(Arc::clone(&stream));
        Ok(stream)
    }
}

/// Peer connection that records what it is told and lets tests play the
/// network side through its listener.
pub struct FakePeerConnection {
    ice_servers: Vec<IceServer>,
    listener: Arc<dyn PeerConnectionListener>,
    local_description: Mutex<Option<SessionDescription>>,
    remote_description: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    tracks: Mutex<Vec<TrackKind>>,
    closed: AtomicBool,
}

impl FakePeerConnection {
    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.local_description).clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.remote_description).clone()
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.candidates).clone()
    }

    pub fn track_kinds(&self) -> Vec<TrackKind> {
        lock(&self.tracks).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, state: PeerConnectionState) {
        self.listener.on_connection_state_change(state);
    }

    pub fn gather_candidate(&self, candidate: IceCandidate) {
        self.listener.on_candidate(candidate);
    }

    pub fn receive_remote_stream(&self) {
        self.listener.on_remote_stream(RemoteStream {
            id: Uuid::new_v4().to_string(),
            kinds: vec![TrackKind::Audio],
        });
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.is_closed() {
            bail!("peer connection is closed");
        }
        Ok(())
    }

    fn fake_sdp(&self) -> String {
        format!("v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\n", Uuid::new_v4().as_u128() % 1_000_000)
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn create_offer(&self) -> anyhow::Result<SessionDescription> {
        self.ensure_open()?;
        Ok(SessionDescription::offer(self.fake_sdp()))
    }

    async fn create_answer(&self) -> anyhow::Result<SessionDescription> {
        self.ensure_open()?;
        if lock(&self.remote_description).is_none() {
            return Err(anyhow!("cannot answer without a remote offer"));
        }
        Ok(SessionDescription::answer(self.fake_sdp()))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> anyhow::Result<()> {
        self.ensure_open()?;
        *lock(&self.local_description) = Some(description.clone());
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> anyhow::Result<()> {
        self.ensure_open()?;
        *lock(&self.remote_description) = Some(description.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> anyhow::Result<()> {
        self.ensure_open()?;
        if lock(&self.remote_description).is_none() {
            bail!("candidate added before remote description");
        }
        lock(&self.candidates).push(candidate.clone());
        Ok(())
    }

    fn add_track(&self, track: Arc<dyn MediaTrack>) -> anyhow::Result<()> {
        self.ensure_open()?;
        lock(&self.tracks).push(track.kind());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakePeerConnectionFactory {
    created: Mutex<Vec<Arc<FakePeerConnection>>>,
}

impl FakePeerConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<Arc<FakePeerConnection>> {
        lock(&self.created).last().map(Arc::clone)
    }

    pub fn created(&self) -> usize {
        lock(&self.created).len()
    }
}

impl PeerConnectionFactory for FakePeerConnectionFactory {
    fn create(
        &self,
        ice_servers: &[IceServer],
        listener: Arc<dyn PeerConnectionListener>,
    ) -> anyhow::Result<Arc<dyn PeerConnection>> {
        let connection = Arc::new(FakePeerConnection {
            ice_servers: ice_servers.to_vec(),
            listener,
            local_description: Mutex::new(None),
            remote_description: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        lock(&self.created).push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// Listener that only records the callbacks it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub states: Mutex<Vec<PeerConnectionState>>,
    pub streams: Mutex<Vec<RemoteStream>>,
}

impl PeerConnectionListener for RecordingListener {
    fn on_candidate(&self, candidate: IceCandidate) {
        lock(&self.candidates).push(candidate);
    }

    fn on_connection_state_change(&self, state: PeerConnectionState) {
        lock(&self.states).push(state);
    }

    fn on_remote_stream(&self, stream: RemoteStream) {
        lock(&self.streams).push(stream);
    }
}

/// Transport that keeps everything it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    joined: Mutex<Vec<CallId>>,
    sent: Mutex<Vec<SignalEnvelope>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn joined(&self) -> Vec<CallId> {
        lock(&self.joined).clone()
    }

    /// Remove and return the envelopes sent so far.
    pub fn take_sent(&self) -> Vec<SignalEnvelope> {
        std::mem::take(&mut *lock(&self.sent))
    }
}

impl SignalingTransport for RecordingTransport {
    fn join(&self, call_id: &CallId) -> anyhow::Result<()> {
        lock(&self.joined).push(call_id.clone());
        Ok(())
    }

    fn leave(&self, call_id: &CallId) -> anyhow::Result<()> {
        lock(&self.joined).retain(|id| id != call_id);
        Ok(())
    }

    fn send(&self, envelope: SignalEnvelope) -> anyhow::Result<()> {
        lock(&self.sent).push(envelope);
        Ok(())
    }
}

/// Lifecycle API for a single two-party conversation, enforcing the call
/// state graph locally. Every request is recorded as `"<operation> <call id>"`.
pub struct FakeCallApi {
    user: UserId,
    peer: UserId,
    calls: Mutex<HashMap<CallId, Call>>,
    requests: Mutex<Vec<String>>,
}

impl FakeCallApi {
    pub fn new(user: UserId, peer: UserId) -> Self {
        Self {
            user,
            peer,
            calls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Make a call known, e.g. one announced by an incoming ringing event.
    pub fn insert(&self, call: Call) {
        lock(&self.calls).insert(call.id.clone(), call);
    }

    pub fn call(&self, call_id: &CallId) -> Option<Call> {
        lock(&self.calls).get(call_id).cloned()
    }

    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }

    fn transition(
        &self,
        operation: &str,
        call_id: &CallId,
        to: CallStatus,
        error_reason: Option<&str>,
    ) -> Result<Call, ApiError> {
        lock(&self.requests).push(format!("{operation} {call_id}"));
        let mut calls = lock(&self.calls);
        let call = calls
            .get_mut(call_id)
            .ok_or_else(|| ApiError::new(ErrorKind::NotFound, format!("call {call_id}")))?;
        if !call.status.can_transition_to(to) {
            return Err(ApiError::new(
                ErrorKind::Conflict,
                format!("call {call_id} is {}, cannot {operation}", call.status),
            ));
        }
        let now = Utc::now();
        call.status = to;
        call.updated_at = now;
        if to == CallStatus::Active {
            call.started_at = Some(now);
        }
        if to.is_terminal() {
            call.ended_at = Some(now);
        }
        call.error_reason = error_reason.map(str::to_owned);
        Ok(call.clone())
    }
}

#[async_trait]
impl CallApi for FakeCallApi {
    async fn initiate(
        &self,
        conversation_id: &ConversationId,
        call_type: CallType,
    ) -> Result<Call, ApiError> {
        let call = Call::ringing(
            CallId::new(Uuid::new_v4().to_string()),
            conversation_id.clone(),
            self.user.clone(),
            self.peer.clone(),
            call_type,
            Utc::now(),
        );
        lock(&self.requests).push(format!("initiate {}", call.id));
        self.insert(call.clone());
        Ok(call)
    }

    async fn answer(&self, call_id: &CallId) -> Result<Call, ApiError> {
        self.transition("answer", call_id, CallStatus::Active, None)
    }

    async fn decline(&self, call_id: &CallId) -> Result<Call, ApiError> {
        self.transition("decline", call_id, CallStatus::Declined, None)
    }

    async fn missed(&self, call_id: &CallId) -> Result<Call, ApiError> {
        self.transition("missed", call_id, CallStatus::Missed, None)
    }

    async fn end(&self, call_id: &CallId) -> Result<Call, ApiError> {
        self.transition("end", call_id, CallStatus::Ended, None)
    }

    async fn fail(&self, call_id: &CallId, reason: &str) -> Result<Call, ApiError> {
        self.transition("fail", call_id, CallStatus::Failed, Some(reason))
    }
}
