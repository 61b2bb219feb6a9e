//! Reacts to peer connection state changes: rides out short disconnects and
//! turns lasting ones, or hard failures, into a single termination signal.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::peer::PeerConnectionState;
use crate::timer::TimerGuard;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TerminationReason {
    ReconnectionTimeout,
    ConnectionFailed,
}

impl TerminationReason {
    /// Value recorded as the call's error reason.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReconnectionTimeout => "reconnection_timeout",
            Self::ConnectionFailed => "connection_failed",
        }
    }
}

impl Display for TerminationReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MonitorSignal {
    /// The connection is (again) up.
    Active,
    /// The connection was closed without error.
    Ended,
    Terminate(TerminationReason),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ReconnectPolicy {
    /// How long a disconnected connection may take to come back.
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct ResilienceMonitor {
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<PeerConnectionState>>,
    signals: mpsc::UnboundedSender<MonitorSignal>,
    reconnect_timer: Mutex<Option<TimerGuard>>,
    terminated: Arc<AtomicBool>,
}

impl ResilienceMonitor {
    pub fn new(policy: ReconnectPolicy) -> (Self, mpsc::UnboundedReceiver<MonitorSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(PeerConnectionState::New);
        let monitor = Self {
            policy,
            state: Arc::new(state),
            signals,
            reconnect_timer: Mutex::new(None),
            terminated: Arc::new(AtomicBool::new(false)),
        };
        (monitor, rx)
    }

    pub fn state(&self) -> PeerConnectionState {
        *self.state.borrow()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn on_state_change(&self, state: PeerConnectionState) {
        self.state.send_replace(state);
        match state {
            PeerConnectionState::Connected => {
                if self.cancel_timer() {
                    info!("peer connection recovered");
                }
                self.emit(MonitorSignal::Active);
            }
            PeerConnectionState::Disconnected => self.start_timer(),
            PeerConnectionState::Failed => {
                self.cancel_timer();
                self.terminate(TerminationReason::ConnectionFailed);
            }
            PeerConnectionState::Closed => {
                self.cancel_timer();
                self.emit(MonitorSignal::Ended);
            }
            PeerConnectionState::New | PeerConnectionState::Connecting => {}
        }
    }

    /// Stop watching; a pending reconnection timer is dropped.
    pub fn stop(&self) {
        self.cancel_timer();
    }

    fn start_timer(&self) {
        let mut timer = self
            .reconnect_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if timer.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }
        debug!(
            "peer connection disconnected, waiting up to {:?} for it to recover",
            self.policy.timeout
        );

        let policy = self.policy;
        let mut state = self.state.subscribe();
        let signals = self.signals.clone();
        let terminated = Arc::clone(&self.terminated);
        *timer = Some(TimerGuard::spawn(async move {
            let deadline = Instant::now() + policy.timeout;
            let mut ticks = tokio::time::interval(policy.poll_interval);
            // The first tick completes immediately.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                if *state.borrow_and_update() == PeerConnectionState::Connected {
                    return;
                }
                if Instant::now() >= deadline {
                    warn!("peer connection did not recover within {:?}", policy.timeout);
                    send_terminate(&terminated, &signals, TerminationReason::ReconnectionTimeout);
                    return;
                }
            }
        }));
    }

    fn cancel_timer(&self) -> bool {
        self.reconnect_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map_or(false, |timer| !timer.is_finished())
    }

    fn terminate(&self, reason: TerminationReason) {
        send_terminate(&self.terminated, &self.signals, reason);
    }

    fn emit(&self, signal: MonitorSignal) {
        // The receiver is gone once its session is dropped.
        let _ = self.signals.send(signal);
    }
}

fn send_terminate(
    terminated: &AtomicBool,
    signals: &mpsc::UnboundedSender<MonitorSignal>,
    reason: TerminationReason,
) {
    if !terminated.swap(true, Ordering::SeqCst) {
        let _ = signals.send(MonitorSignal::Terminate(reason));
    }
}
