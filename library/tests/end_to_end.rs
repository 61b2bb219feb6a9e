//! Two call sessions talking to each other through an in-process server: the
//! lifecycle manager for call state, the relay for signaling and the hub for
//! lifecycle notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use peer_calls::peer::PeerConnectionState;
use peer_calls::testing::{FakeMediaDevices, FakePeerConnectionFactory};
use peer_calls::{
    ApiError, CallApi, CallPhase, CallSession, CallUiStore, SessionConfig, SessionDeps,
    SignalingTransport,
};
use peer_calls_protocol::{
    Call, CallId, CallStatus, CallType, ConversationId, IceCandidate, LifecycleEventKind,
    SignalEnvelope, SignalMessage, UserId,
};
use peer_calls_server::pubsub::SubscriberId;
use peer_calls_server::relay::is_deliverable;
use peer_calls_server::{
    CallStore, LifecycleManager, MemoryCallStore, ServerState, SignalingRelay, StaticMembership,
    Topic,
};
use tokio::sync::mpsc;

struct ServerApi {
    user: UserId,
    lifecycle: Arc<LifecycleManager>,
}

#[async_trait]
impl CallApi for ServerApi {
    async fn initiate(
        &self,
        conversation_id: &ConversationId,
        call_type: CallType,
    ) -> Result<Call, ApiError> {
        self.lifecycle
            .initiate(&self.user, conversation_id, call_type)
            .await
            .map_err(|err| err.to_body().into())
    }

    async fn answer(&self, call_id: &CallId) -> Result<Call, ApiError> {
        self.lifecycle
            .answer(&self.user, call_id)
            .await
            .map_err(|err| err.to_body().into())
    }

    async fn decline(&self, call_id: &CallId) -> Result<Call, ApiError> {
        self.lifecycle
            .decline(&self.user, call_id)
            .await
            .map_err(|err| err.to_body().into())
    }

    async fn missed(&self, call_id: &CallId) -> Result<Call, ApiError> {
        self.lifecycle
            .missed(call_id)
            .await
            .map_err(|err| err.to_body().into())
    }

    async fn end(&self, call_id: &CallId) -> Result<Call, ApiError> {
        self.lifecycle
            .end(&self.user, call_id)
            .await
            .map_err(|err| err.to_body().into())
    }

    async fn fail(&self, call_id: &CallId, reason: &str) -> Result<Call, ApiError> {
        self.lifecycle
            .fail(&self.user, call_id, reason)
            .await
            .map_err(|err| err.to_body().into())
    }
}

enum Command {
    Join(CallId),
    Leave(CallId),
    Send(SignalEnvelope),
}

/// Queues transport requests so a single task applies them to the relay in order.
struct RelayTransport {
    commands: mpsc::UnboundedSender<Command>,
}

impl SignalingTransport for RelayTransport {
    fn join(&self, call_id: &CallId) -> anyhow::Result<()> {
        Ok(self.commands.send(Command::Join(call_id.clone()))?)
    }

    fn leave(&self, call_id: &CallId) -> anyhow::Result<()> {
        Ok(self.commands.send(Command::Leave(call_id.clone()))?)
    }

    fn send(&self, envelope: SignalEnvelope) -> anyhow::Result<()> {
        Ok(self.commands.send(Command::Send(envelope))?)
    }
}

async fn apply_commands(
    user: UserId,
    relay: SignalingRelay,
    mut commands: mpsc::UnboundedReceiver<Command>,
    inbox: mpsc::UnboundedSender<SignalMessage>,
) {
    let id = SubscriberId::next();
    while let Some(command) = commands.recv().await {
        match command {
            Command::Join(call_id) => {
                relay
                    .join(&user, &call_id, id, inbox.clone())
                    .await
                    .unwrap();
            }
            Command::Leave(call_id) => relay.leave(&call_id, id).await,
            Command::Send(envelope) => relay.forward(&user, envelope).await,
        }
    }
}

struct Client {
    session: CallSession,
    ui: CallUiStore,
    factory: Arc<FakePeerConnectionFactory>,
    media: Arc<FakeMediaDevices>,
}

async fn client(state: &ServerState, user: &str) -> Client {
    let user = UserId::from(user);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel();
    let (notifications_tx, mut notifications_rx) = mpsc::unbounded_channel();

    let factory = Arc::new(FakePeerConnectionFactory::new());
    let media = Arc::new(FakeMediaDevices::new());
    let ui = CallUiStore::new(user.clone());
    let deps = SessionDeps {
        api: Arc::new(ServerApi {
            user: user.clone(),
            lifecycle: Arc::clone(&state.lifecycle),
        }),
        transport: Arc::new(RelayTransport {
            commands: commands_tx,
        }),
        peer_connections: Arc::clone(&factory) as _,
        media: Arc::clone(&media) as _,
        ui: ui.clone(),
    };
    let session = CallSession::new(deps, SessionConfig::default());

    state
        .hub
        .subscribe(Topic::User(user.clone()), SubscriberId::next(), notifications_tx)
        .await;
    tokio::spawn(apply_commands(
        user.clone(),
        state.relay.clone(),
        commands_rx,
        inbox_tx,
    ));

    let signals = session.clone();
    let signal_user = user.clone();
    tokio::spawn(async move {
        while let Some(message) = inbox_rx.recv().await {
            if !is_deliverable(&message, &signal_user) {
                continue;
            }
            if let SignalMessage::Signal(envelope) = message {
                signals.handle_signal(envelope).await.unwrap();
            }
        }
    });

    let lifecycle = session.clone();
    tokio::spawn(async move {
        while let Some(message) = notifications_rx.recv().await {
            let SignalMessage::Lifecycle(event) = message else {
                continue;
            };
            if event.kind == LifecycleEventKind::CallRinging && lifecycle.call().is_none() {
                lifecycle.incoming(&event).unwrap();
            } else {
                lifecycle.handle_lifecycle(&event).await.unwrap();
            }
        }
    });

    Client {
        session,
        ui,
        factory,
        media,
    }
}

async fn server() -> ServerState {
    let membership = StaticMembership::new();
    membership
        .add_conversation("conv-1".into(), ["alice".into(), "bob".into()])
        .await;
    ServerState::new(Arc::new(MemoryCallStore::new()), Arc::new(membership), false)
}

/// Let every spawned task run until nothing is left to do.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn stored(state: &ServerState, call_id: &CallId) -> Call {
    state
        .lifecycle
        .store()
        .get_call(call_id)
        .await
        .unwrap()
        .unwrap()
}

async fn ringing_call(state: &ServerState, alice: &Client, bob: &Client) -> Call {
    let call = alice
        .session
        .start_outgoing(&"conv-1".into(), CallType::Video)
        .await
        .unwrap();
    settle().await;
    assert_eq!(bob.session.call().map(|c| c.id), Some(call.id.clone()));
    assert_eq!(bob.ui.snapshot().phase, CallPhase::Ringing);
    assert_eq!(stored(state, &call.id).await.status, CallStatus::Ringing);
    call
}

#[tokio::test(start_paused = true)]
async fn call_connects_and_hangs_up() {
    let state = server().await;
    let alice = client(&state, "alice").await;
    let bob = client(&state, "bob").await;
    let call = ringing_call(&state, &alice, &bob).await;

    bob.session.answer().await.unwrap();
    settle().await;

    let caller_connection = alice.factory.last().unwrap();
    let callee_connection = bob.factory.last().unwrap();
    assert_eq!(
        caller_connection.local_description(),
        callee_connection.remote_description()
    );
    assert_eq!(
        callee_connection.local_description(),
        caller_connection.remote_description()
    );
    assert!(caller_connection.remote_description().is_some());

    let candidate = IceCandidate {
        candidate: "candidate:1 1 udp 2122260223 192.168.1.2 50000 typ host".to_owned(),
        sdp_mid: Some("0".to_owned()),
        sdp_m_line_index: Some(0),
    };
    caller_connection.gather_candidate(candidate.clone());
    settle().await;
    assert_eq!(callee_connection.added_candidates(), vec![candidate]);
    assert!(caller_connection.added_candidates().is_empty());

    caller_connection.set_state(PeerConnectionState::Connected);
    callee_connection.set_state(PeerConnectionState::Connected);
    settle().await;
    assert_eq!(alice.ui.snapshot().phase, CallPhase::Active);
    assert_eq!(bob.ui.snapshot().phase, CallPhase::Active);
    assert_eq!(stored(&state, &call.id).await.status, CallStatus::Active);

    alice.session.hang_up().await.unwrap();
    settle().await;

    let ended = stored(&state, &call.id).await;
    assert_eq!(ended.status, CallStatus::Ended);
    assert!(ended.ended_at.is_some());
    for side in [&alice, &bob] {
        assert!(side.session.is_terminated());
        assert!(side.factory.last().unwrap().is_closed());
        assert!(side.media.last_stream().unwrap().is_stopped());
        assert_eq!(side.ui.snapshot().phase, CallPhase::Ended);
    }
    assert_eq!(
        state
            .hub
            .subscriber_count(&Topic::Call(call.id.clone()))
            .await,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn declined_call_releases_the_caller() {
    let state = server().await;
    let alice = client(&state, "alice").await;
    let bob = client(&state, "bob").await;
    let call = ringing_call(&state, &alice, &bob).await;

    bob.session.decline().await.unwrap();
    settle().await;

    assert_eq!(stored(&state, &call.id).await.status, CallStatus::Declined);
    assert!(alice.session.is_terminated());
    assert!(alice.factory.last().unwrap().is_closed());
    assert!(alice.media.last_stream().unwrap().is_stopped());
    assert_eq!(alice.ui.snapshot().phase, CallPhase::Ended);
    // The callee never captured anything.
    assert!(bob.media.last_stream().is_none());
    assert!(bob.session.is_terminated());
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_is_missed_on_both_sides() {
    let state = server().await;
    let alice = client(&state, "alice").await;
    let bob = client(&state, "bob").await;
    let call = ringing_call(&state, &alice, &bob).await;

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;

    assert_eq!(stored(&state, &call.id).await.status, CallStatus::Missed);
    assert!(alice.session.is_terminated());
    assert!(bob.session.is_terminated());
    assert!(alice.media.last_stream().unwrap().is_stopped());
    // Answering after the fact is refused without touching the server.
    assert!(bob.session.answer().await.is_err());
    assert_eq!(stored(&state, &call.id).await.status, CallStatus::Missed);
}

#[tokio::test(start_paused = true)]
async fn second_call_in_a_busy_conversation_is_refused() {
    let state = server().await;
    let alice = client(&state, "alice").await;
    let bob = client(&state, "bob").await;
    let call = ringing_call(&state, &alice, &bob).await;

    let again = client(&state, "alice").await;
    let err = again
        .session
        .start_outgoing(&"conv-1".into(), CallType::Voice)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        peer_calls::Error::Api(ApiError {
            kind: peer_calls_protocol::ErrorKind::AlreadyInCall,
            ..
        })
    ));
    assert_eq!(stored(&state, &call.id).await.status, CallStatus::Ringing);
    assert!(again.factory.last().is_none());
}
