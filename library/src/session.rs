/*!
Per-call context tying the negotiator, the resilience monitor and the UI store
to one call.

A [`CallSession`] is created for exactly one call, either by placing it with
[`CallSession::start_outgoing`] or from a ringing notification with
[`CallSession::incoming`]. Lifecycle notifications and signaling envelopes
received by the application are handed to [`CallSession::handle_lifecycle`] and
[`CallSession::handle_signal`]; anything that belongs to another call, or
arrives after the call ended, is discarded.

The session is a pointer to shared state and can be cloned freely.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use peer_calls_protocol::{
    Call, CallStatus, CallType, ConversationId, IceCandidate, LifecycleEvent,
    LifecycleEventKind, Signal, SignalEnvelope, UserId,
};
use tokio::sync::mpsc;

use crate::api::{CallApi, SignalingTransport};
use crate::error::{ApiError, Error, Result};
use crate::negotiator::ConnectionNegotiator;
use crate::peer::{
    MediaConstraints, MediaDevices, PeerConnectionFactory, PeerConnectionListener,
    PeerConnectionState, RemoteStream,
};
use crate::resilience::{MonitorSignal, ReconnectPolicy, ResilienceMonitor};
use crate::timer::TimerGuard;
use crate::ui_state::CallUiStore;
use crate::utils::ConnectionType;

/// How long an outgoing call rings before the caller gives up.
pub const RING_TIMEOUT: Duration = Duration::from_secs(30);

/// Error reason shown when local capture could not be started.
const MEDIA_ERROR_REASON: &str = "media_error";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connection_type: ConnectionType,
    pub reconnect: ReconnectPolicy,
    pub ring_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::default(),
            reconnect: ReconnectPolicy::default(),
            ring_timeout: RING_TIMEOUT,
        }
    }
}

/// Platform and server collaborators shared by every session of a client.
#[derive(Clone)]
pub struct SessionDeps {
    pub api: Arc<dyn CallApi>,
    pub transport: Arc<dyn SignalingTransport>,
    pub peer_connections: Arc<dyn PeerConnectionFactory>,
    pub media: Arc<dyn MediaDevices>,
    pub ui: CallUiStore,
}

struct SessionInner {
    local_user: UserId,
    api: Arc<dyn CallApi>,
    transport: Arc<dyn SignalingTransport>,
    negotiator: ConnectionNegotiator,
    monitor: ResilienceMonitor,
    ui: CallUiStore,
    config: SessionConfig,
    call: Mutex<Option<Call>>,
    ring_timer: Mutex<Option<TimerGuard>>,
    terminated: AtomicBool,
}

#[derive(Clone)]
pub struct CallSession {
    inner: Arc<SessionInner>,
}

impl CallSession {
    pub fn new(deps: SessionDeps, config: SessionConfig) -> Self {
        let (monitor, signals) = ResilienceMonitor::new(config.reconnect);
        let inner = Arc::new(SessionInner {
            local_user: deps.ui.local_user().clone(),
            api: deps.api,
            transport: deps.transport,
            negotiator: ConnectionNegotiator::new(
                deps.peer_connections,
                deps.media,
                config.connection_type.clone(),
            ),
            monitor,
            ui: deps.ui,
            config,
            call: Mutex::new(None),
            ring_timer: Mutex::new(None),
            terminated: AtomicBool::new(false),
        });
        tokio::spawn(pump_monitor_signals(Arc::downgrade(&inner), signals));
        Self { inner }
    }

    pub fn call(&self) -> Option<Call> {
        self.inner.current_call()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    pub fn negotiator(&self) -> &ConnectionNegotiator {
        &self.inner.negotiator
    }

    /// Place a call: initiate it, open the connection, capture local media
    /// and start the ring timer. A media failure ends the call right away.
    pub async fn start_outgoing(
        &self,
        conversation_id: &ConversationId,
        call_type: CallType,
    ) -> Result<Call> {
        let inner = &self.inner;
        inner.claim()?;
        let call = inner.api.initiate(conversation_id, call_type).await?;
        info!("calling {} ({})", call.receiver_id, call.id);
        inner.set_call(call.clone());
        inner.ui.begin(&call);
        if let Err(err) = inner.transport.join(&call.id) {
            warn!("could not join signaling of call {}: {err}", call.id);
        }

        let connected = inner.connect(call_type).await;
        if inner.is_terminated() {
            return Err(inner.abandon_setup(&call).await);
        }
        if let Err(err) = connected {
            let reason = match &err {
                Error::MediaAccess(_) => MEDIA_ERROR_REASON,
                _ => "connection_setup_failed",
            };
            warn!("could not set up outgoing call {}: {err}", call.id);
            inner.report(inner.api.end(&call.id).await, "end");
            inner.shutdown(Some(reason)).await;
            return Err(err);
        }

        let weak = Arc::downgrade(&self.inner);
        let ring_timeout = inner.config.ring_timeout;
        let timer = TimerGuard::spawn(async move {
            tokio::time::sleep(ring_timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.ring_expired().await;
            }
        });
        *lock(&inner.ring_timer) = Some(timer);
        Ok(call)
    }

    /// Take over an incoming call announced by a `call_ringing` notification.
    pub fn incoming(&self, event: &LifecycleEvent) -> Result<()> {
        let inner = &self.inner;
        if event.kind != LifecycleEventKind::CallRinging || event.call.receiver_id != inner.local_user
        {
            return Err(Error::Signaling(format!(
                "{:?} for call {} is not an incoming call for {}",
                event.kind, event.call_id, inner.local_user
            )));
        }
        inner.claim()?;
        info!("incoming call {} from {}", event.call_id, event.call.initiator_id);
        inner.set_call(event.call.clone());
        inner.ui.begin(&event.call);
        // Join now so the caller's offer cannot overtake the subscription.
        if let Err(err) = inner.transport.join(&event.call_id) {
            warn!("could not join signaling of call {}: {err}", event.call_id);
        }
        Ok(())
    }

    /// Accept the ringing call. A media failure declines it instead.
    pub async fn answer(&self) -> Result<Call> {
        let inner = &self.inner;
        let call = inner.live_call()?;
        inner.ui.connecting();

        let connected = inner.connect(call.call_type).await;
        if inner.is_terminated() {
            return Err(inner.abandon_setup(&call).await);
        }
        if let Err(err) = connected {
            warn!("could not set up call {}: {err}", call.id);
            if matches!(err, Error::MediaAccess(_)) {
                inner.report(inner.api.decline(&call.id).await, "decline");
                inner.shutdown(Some(MEDIA_ERROR_REASON)).await;
            } else {
                inner.report(inner.api.end(&call.id).await, "end");
                inner.shutdown(Some("connection_setup_failed")).await;
            }
            return Err(err);
        }

        match inner.api.answer(&call.id).await {
            Ok(call) => {
                inner.set_call(call.clone());
                Ok(call)
            }
            Err(err) => {
                warn!("answering call {} failed: {err}", call.id);
                inner.shutdown(Some(end_reason_for(&err))).await;
                Err(err.into())
            }
        }
    }

    pub async fn decline(&self) -> Result<Call> {
        let inner = &self.inner;
        let call = inner.live_call()?;
        let result = inner.api.decline(&call.id).await;
        inner.shutdown(Some("declined")).await;
        Ok(result?)
    }

    /// End the call from this side. A call the peer already ended counts as ended.
    pub async fn hang_up(&self) -> Result<()> {
        let inner = &self.inner;
        let call = inner.live_call()?;
        let result = inner.api.end(&call.id).await;
        inner.shutdown(Some("ended")).await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_conflict() => {
                debug!("call {} was already over: {err}", call.id);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn set_audio_muted(&self, muted: bool) {
        self.inner.negotiator.toggle_audio(muted).await;
        self.inner.ui.set_audio_muted(muted);
    }

    pub async fn set_video_disabled(&self, disabled: bool) {
        self.inner.negotiator.toggle_video(disabled).await;
        self.inner.ui.set_video_disabled(disabled);
    }

    pub async fn handle_lifecycle(&self, event: &LifecycleEvent) -> Result<()> {
        let inner = &self.inner;
        let Some(call) = inner.current_call() else {
            return Ok(());
        };
        if event.call_id != call.id {
            debug!("ignoring {:?} for other call {}", event.kind, event.call_id);
            return Ok(());
        }
        if inner.is_terminated() {
            return Ok(());
        }
        inner.set_call(event.call.clone());
        inner.ui.on_lifecycle(event);

        match event.kind {
            LifecycleEventKind::CallAnswered if call.initiator_id == inner.local_user => {
                inner.cancel_ring_timer();
                let offer = inner.negotiator.create_offer().await?;
                debug!("call {} answered, sending offer", call.id);
                inner.send(&call, Signal::Offer(offer));
            }
            kind if kind.is_terminal() => {
                info!("call {} is over ({:?})", call.id, kind);
                inner.shutdown(None).await;
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn handle_signal(&self, envelope: SignalEnvelope) -> Result<()> {
        let inner = &self.inner;
        let Some(call) = inner.current_call() else {
            return Ok(());
        };
        if envelope.call_id != call.id
            || !envelope.is_addressed_to(&inner.local_user)
            || inner.is_terminated()
        {
            debug!(
                "discarding {:?} for call {} addressed to {}",
                envelope.kind(),
                envelope.call_id,
                envelope.target_user_id
            );
            return Ok(());
        }

        match envelope.signal {
            Signal::Offer(offer) => {
                let answer = inner.negotiator.create_answer(&offer).await?;
                inner.send(&call, Signal::Answer(answer));
            }
            Signal::Answer(answer) => inner.negotiator.apply_remote_description(&answer).await?,
            Signal::Candidate(candidate) => inner.negotiator.apply_remote_candidate(candidate).await?,
        }
        Ok(())
    }
}

impl SessionInner {
    fn current_call(&self) -> Option<Call> {
        lock(&self.call).clone()
    }

    fn set_call(&self, call: Call) {
        *lock(&self.call) = Some(call);
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// A session serves one call only.
    fn claim(&self) -> Result<()> {
        if self.is_terminated() || lock(&self.call).is_some() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn live_call(&self) -> Result<Call> {
        match self.current_call() {
            Some(call) if !self.is_terminated() && !call.status.is_terminal() => Ok(call),
            _ => Err(Error::Closed),
        }
    }

    fn listener(self: &Arc<Self>) -> Arc<dyn PeerConnectionListener> {
        Arc::new(SessionListener {
            inner: Arc::downgrade(self),
        })
    }

    async fn connect(self: &Arc<Self>, call_type: CallType) -> Result<()> {
        self.negotiator.create_connection(self.listener()).await?;
        self.negotiator
            .attach_local_media(MediaConstraints::for_call(call_type))
            .await
    }

    /// The call ended while the connection was being set up. Whatever the
    /// setup acquired after the shutdown is released here.
    async fn abandon_setup(&self, call: &Call) -> Error {
        debug!("call {} ended during setup", call.id);
        self.shutdown(None).await;
        Error::Closed
    }

    fn send(&self, call: &Call, signal: Signal) {
        let Some(peer) = call.peer_of(&self.local_user) else {
            return;
        };
        let envelope = SignalEnvelope {
            call_id: call.id.clone(),
            from_user_id: self.local_user.clone(),
            target_user_id: peer.clone(),
            signal,
        };
        if let Err(err) = self.transport.send(envelope) {
            warn!("failed to send signal for call {}: {err}", call.id);
        }
    }

    fn report(&self, result: std::result::Result<Call, ApiError>, operation: &str) {
        match result {
            Ok(call) => self.set_call(call),
            Err(err) if err.is_conflict() => debug!("{operation} not applied: {err}"),
            Err(err) => warn!("{operation} failed: {err}"),
        }
    }

    fn cancel_ring_timer(&self) {
        lock(&self.ring_timer).take();
    }

    async fn ring_expired(&self) {
        let Ok(call) = self.live_call() else {
            return;
        };
        if call.status != CallStatus::Ringing {
            return;
        }
        info!("call {} was not answered in time", call.id);
        let result = self.api.missed(&call.id).await;
        if matches!(&result, Err(err) if err.is_conflict()) {
            // Answered or ended meanwhile; that notification drives the session.
            return;
        }
        self.report(result, "missed");
        self.shutdown(Some("missed")).await;
    }

    async fn on_monitor_signal(&self, signal: MonitorSignal) {
        if self.is_terminated() {
            return;
        }
        match signal {
            MonitorSignal::Active | MonitorSignal::Ended => self.ui.on_monitor_signal(signal),
            MonitorSignal::Terminate(reason) => {
                let Some(call) = self.current_call() else {
                    return;
                };
                warn!(
                    "terminating call {}: {}",
                    call.id,
                    Error::ConnectionFailure(reason)
                );
                self.negotiator.close().await;
                let result = self.api.fail(&call.id, reason.as_str()).await;
                if matches!(&result, Err(err) if err.is_conflict()) {
                    debug!("call {} already ended by the peer", call.id);
                }
                self.report(result, "fail");
                self.shutdown(Some(reason.as_str())).await;
            }
        }
    }

    /// Release everything the call holds. Runs on every exit path; repeated
    /// calls only refresh the UI end reason if the first one had none.
    async fn shutdown(&self, reason: Option<&str>) {
        let first = !self.terminated.swap(true, Ordering::SeqCst);
        self.cancel_ring_timer();
        self.monitor.stop();
        self.negotiator.close().await;
        if first {
            if let Some(call) = self.current_call() {
                if let Err(err) = self.transport.leave(&call.id) {
                    debug!("could not leave signaling of call {}: {err}", call.id);
                }
            }
        }
        if let Some(reason) = reason {
            self.ui.ended(Some(reason.to_owned()));
        }
    }
}

/// Listener handed to the peer connection. Holds the session weakly so the
/// connection never keeps its session alive.
struct SessionListener {
    inner: Weak<SessionInner>,
}

impl PeerConnectionListener for SessionListener {
    fn on_candidate(&self, candidate: IceCandidate) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.is_terminated() {
            return;
        }
        if let Some(call) = inner.current_call() {
            inner.send(&call, Signal::Candidate(candidate));
        }
    }

    fn on_connection_state_change(&self, state: PeerConnectionState) {
        if let Some(inner) = self.inner.upgrade() {
            debug!("peer connection state: {state:?}");
            inner.monitor.on_state_change(state);
        }
    }

    fn on_remote_stream(&self, _stream: RemoteStream) {
        if let Some(inner) = self.inner.upgrade() {
            inner.ui.remote_stream_added();
        }
    }
}

async fn pump_monitor_signals(
    inner: Weak<SessionInner>,
    mut signals: mpsc::UnboundedReceiver<MonitorSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_monitor_signal(signal).await;
    }
}

fn end_reason_for(err: &ApiError) -> &'static str {
    if err.is_conflict() {
        "ended"
    } else {
        "answer_failed"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
