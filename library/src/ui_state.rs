//! Observable call state for the presentation layer.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::debug;
use peer_calls_protocol::{Call, CallId, CallType, LifecycleEvent, LifecycleEventKind, UserId};
use tokio::sync::watch;

use crate::resilience::MonitorSignal;
use crate::timer::TimerGuard;

/// How long the `Ended` phase stays visible before returning to `Idle`.
pub const ENDED_RESET_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum CallPhase {
    #[default]
    Idle,
    Ringing,
    Connecting,
    Active,
    Ended,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallUiState {
    pub phase: CallPhase,
    pub call_id: Option<CallId>,
    pub call_type: Option<CallType>,
    pub direction: Option<CallDirection>,
    pub peer_id: Option<UserId>,
    pub audio_muted: bool,
    pub video_disabled: bool,
    pub has_remote_stream: bool,
    pub end_reason: Option<String>,
}

/// Shared handle; clones observe and drive the same state.
#[derive(Clone)]
pub struct CallUiStore {
    local_user: UserId,
    reset_delay: Duration,
    state: Arc<watch::Sender<CallUiState>>,
    reset_timer: Arc<Mutex<Option<TimerGuard>>>,
}

impl CallUiStore {
    pub fn new(local_user: UserId) -> Self {
        Self::with_reset_delay(local_user, ENDED_RESET_DELAY)
    }

    pub fn with_reset_delay(local_user: UserId, reset_delay: Duration) -> Self {
        let (state, _) = watch::channel(CallUiState::default());
        Self {
            local_user,
            reset_delay,
            state: Arc::new(state),
            reset_timer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CallUiState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> CallUiState {
        self.state.borrow().clone()
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// A new call takes over the store, whatever it showed before.
    pub fn begin(&self, call: &Call) {
        self.cancel_reset();
        let direction = if call.initiator_id == self.local_user {
            CallDirection::Outgoing
        } else {
            CallDirection::Incoming
        };
        let peer_id = call.peer_of(&self.local_user).cloned();
        self.state.send_replace(CallUiState {
            phase: CallPhase::Ringing,
            call_id: Some(call.id.clone()),
            call_type: Some(call.call_type),
            direction: Some(direction),
            peer_id,
            ..CallUiState::default()
        });
    }

    pub fn connecting(&self) {
        self.advance(CallPhase::Connecting);
    }

    pub fn active(&self) {
        self.advance(CallPhase::Active);
    }

    pub fn set_audio_muted(&self, muted: bool) {
        self.state.send_modify(|state| state.audio_muted = muted);
    }

    pub fn set_video_disabled(&self, disabled: bool) {
        self.state.send_modify(|state| state.video_disabled = disabled);
    }

    pub fn remote_stream_added(&self) {
        self.state.send_modify(|state| state.has_remote_stream = true);
    }

    /// Show the call as ended, then reset to idle after the reset delay
    /// unless another call has started in between.
    pub fn ended(&self, reason: Option<String>) {
        let mut ended_call = None;
        self.state.send_if_modified(|state| {
            if matches!(state.phase, CallPhase::Idle | CallPhase::Ended) {
                return false;
            }
            state.phase = CallPhase::Ended;
            state.end_reason = reason;
            ended_call = state.call_id.clone();
            true
        });
        let Some(ended_call) = ended_call else {
            return;
        };

        let state = Arc::clone(&self.state);
        let timer = TimerGuard::after(self.reset_delay, move || {
            state.send_if_modified(|current| {
                if current.phase != CallPhase::Ended || current.call_id.as_ref() != Some(&ended_call)
                {
                    return false;
                }
                *current = CallUiState::default();
                true
            });
        });
        *self
            .reset_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(timer);
    }

    /// Apply a lifecycle notification. Events authored by the local user and
    /// events for a call other than the shown one are ignored.
    pub fn on_lifecycle(&self, event: &LifecycleEvent) {
        if event.is_authored_by(&self.local_user) {
            debug!("ignoring own {:?} for call {}", event.kind, event.call_id);
            return;
        }
        let current = self.snapshot();
        let shows_other_call = current
            .call_id
            .as_ref()
            .map_or(false, |id| id != &event.call_id);

        match event.kind {
            LifecycleEventKind::CallRinging => {
                if matches!(current.phase, CallPhase::Idle | CallPhase::Ended) {
                    self.begin(&event.call);
                } else {
                    debug!("busy, not showing incoming call {}", event.call_id);
                }
            }
            _ if shows_other_call || current.call_id.is_none() => {
                debug!("ignoring {:?} for call {}", event.kind, event.call_id);
            }
            LifecycleEventKind::CallAnswered => self.connecting(),
            kind => self.ended(Some(end_reason(kind, event.call.error_reason.as_deref()))),
        }
    }

    pub fn on_monitor_signal(&self, signal: MonitorSignal) {
        match signal {
            MonitorSignal::Active => self.active(),
            MonitorSignal::Ended => self.ended(None),
            MonitorSignal::Terminate(reason) => self.ended(Some(reason.as_str().to_owned())),
        }
    }

    fn advance(&self, phase: CallPhase) {
        self.state.send_if_modified(|state| {
            if matches!(state.phase, CallPhase::Idle | CallPhase::Ended) || state.phase == phase {
                return false;
            }
            state.phase = phase;
            true
        });
    }

    fn cancel_reset(&self) {
        self.reset_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

fn end_reason(kind: LifecycleEventKind, error_reason: Option<&str>) -> String {
    match (kind, error_reason) {
        (LifecycleEventKind::CallFailed, Some(reason)) => reason.to_owned(),
        (LifecycleEventKind::CallDeclined, _) => "declined".to_owned(),
        (LifecycleEventKind::CallMissed, _) => "missed".to_owned(),
        (LifecycleEventKind::CallFailed, None) => "failed".to_owned(),
        _ => "ended".to_owned(),
    }
}
