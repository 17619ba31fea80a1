use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

/// Replication operation classes. Each tracks its own health so a
/// failing export never blocks imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Export,
    Import,
    Setup,
    Fetch,
    Modify,
}

impl OperationType {
    pub const ALL: [OperationType; 5] = [
        OperationType::Export,
        OperationType::Import,
        OperationType::Setup,
        OperationType::Fetch,
        OperationType::Modify,
    ];

    /// Outbound types are the ones a Failed state suppresses during the
    /// backoff window.
    pub fn is_outbound(&self) -> bool {
        matches!(
            self,
            OperationType::Export | OperationType::Setup | OperationType::Modify
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Export => "export",
            OperationType::Import => "import",
            OperationType::Setup => "setup",
            OperationType::Fetch => "fetch",
            OperationType::Modify => "modify",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse reliability classification of one operation type. Carries
/// the streak counters the transition rules are defined over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown { successes: u32 },
    Healthy,
    Degraded { failures: u32, successes: u32 },
    Failed { failures: u32 },
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, HealthState::Failed { .. })
    }
}

impl Default for HealthState {
    fn default() -> Self {
        HealthState::Unknown { successes: 0 }
    }
}

/// Classified result of one replication operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Timeout or transient server error; counts toward degradation.
    Retryable,
    /// Schema or auth failure; forces Failed immediately.
    Terminal,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Consecutive successes needed to reach Healthy.
    pub healthy: u32,
    /// Consecutive failures in Degraded before Failed.
    pub failed: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { healthy: 2, failed: 3 }
    }
}

/// Pure transition function. No I/O, no clocks; the monitor layers the
/// backoff window on top.
pub fn next(state: HealthState, outcome: Outcome, thresholds: Thresholds) -> HealthState {
    if outcome == Outcome::Terminal {
        return HealthState::Failed {
            failures: thresholds.failed,
        };
    }

    match (state, outcome) {
        (HealthState::Unknown { successes }, Outcome::Success) => {
            if successes + 1 >= thresholds.healthy {
                HealthState::Healthy
            } else {
                HealthState::Unknown {
                    successes: successes + 1,
                }
            }
        }
        (HealthState::Unknown { .. }, Outcome::Retryable) => HealthState::Degraded {
            failures: 1,
            successes: 0,
        },

        (HealthState::Healthy, Outcome::Success) => HealthState::Healthy,
        (HealthState::Healthy, Outcome::Retryable) => HealthState::Degraded {
            failures: 1,
            successes: 0,
        },

        (HealthState::Degraded { successes, .. }, Outcome::Success) => {
            if successes + 1 >= thresholds.healthy {
                HealthState::Healthy
            } else {
                HealthState::Degraded {
                    failures: 0,
                    successes: successes + 1,
                }
            }
        }
        (HealthState::Degraded { failures, .. }, Outcome::Retryable) => {
            if failures + 1 >= thresholds.failed {
                HealthState::Failed {
                    failures: failures + 1,
                }
            } else {
                HealthState::Degraded {
                    failures: failures + 1,
                    successes: 0,
                }
            }
        }

        (HealthState::Failed { .. }, Outcome::Success) => HealthState::Degraded {
            failures: 0,
            successes: 1,
        },
        (HealthState::Failed { failures }, Outcome::Retryable) => {
            HealthState::Failed { failures }
        }

        (_, Outcome::Terminal) => unreachable!("terminal handled above"),
    }
}

/// Emitted on every state change, for degraded-mode banners and the
/// request coordinator.
#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub op: OperationType,
    pub from: HealthState,
    pub to: HealthState,
}

#[derive(Debug, Default)]
struct TypeHealth {
    state: HealthState,
    /// Set by a terminal failure; blocks the type until reset.
    terminal: bool,
    failed_at: Option<Instant>,
}

/// Per-type health registry. Outcomes are reported only by the request
/// coordinator; everyone else reads. State is ephemeral and restarts
/// as Unknown.
pub struct HealthMonitor {
    thresholds: Thresholds,
    push_backoff: Duration,
    inner: Mutex<HashMap<OperationType, TypeHealth>>,
    events: broadcast::Sender<HealthEvent>,
}

impl HealthMonitor {
    pub fn new(thresholds: Thresholds, push_backoff: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            thresholds,
            push_backoff,
            inner: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    pub fn state(&self, op: OperationType) -> HealthState {
        let inner = self.inner.lock().expect("health lock poisoned");
        inner.get(&op).map(|h| h.state).unwrap_or_default()
    }

    /// Record one classified outcome and return the new state.
    pub fn record(&self, op: OperationType, outcome: Outcome) -> HealthState {
        let mut inner = self.inner.lock().expect("health lock poisoned");
        let entry = inner.entry(op).or_default();
        let from = entry.state;
        let to = next(from, outcome, self.thresholds);

        if outcome == Outcome::Terminal {
            entry.terminal = true;
        }
        match (from.is_failed(), to.is_failed()) {
            (false, true) => entry.failed_at = Some(Instant::now()),
            (true, false) => entry.failed_at = None,
            _ => {}
        }
        entry.state = to;
        drop(inner);

        if from != to {
            tracing::info!("replication {} health: {:?} -> {:?}", op, from, to);
            let _ = self.events.send(HealthEvent { op, from, to });
        }
        to
    }

    /// Whether the remote replica may be treated as authoritative for
    /// this operation type. Only Healthy qualifies; Degraded and Failed
    /// fall back to the local store.
    pub fn remote_authoritative(&self, op: OperationType) -> bool {
        self.state(op).is_healthy()
    }

    /// Whether reads should skip the replica entirely.
    pub fn local_only(&self, op: OperationType) -> bool {
        matches!(
            self.state(op),
            HealthState::Degraded { .. } | HealthState::Failed { .. }
        )
    }

    /// Terminal failures block the type until the host resets it.
    pub fn is_blocked(&self, op: OperationType) -> bool {
        let inner = self.inner.lock().expect("health lock poisoned");
        inner.get(&op).map(|h| h.terminal).unwrap_or(false)
    }

    /// Outbound gate: Failed suppresses new pushes for the backoff
    /// window, after which one attempt is allowed through to probe.
    pub fn push_allowed(&self, op: OperationType) -> bool {
        let inner = self.inner.lock().expect("health lock poisoned");
        let Some(entry) = inner.get(&op) else {
            return true;
        };
        if entry.terminal {
            return false;
        }
        match (entry.state.is_failed(), entry.failed_at) {
            (true, Some(failed_at)) => failed_at.elapsed() >= self.push_backoff,
            _ => true,
        }
    }

    /// Host-initiated reset after a terminal failure was resolved.
    pub fn reset(&self, op: OperationType) {
        let mut inner = self.inner.lock().expect("health lock poisoned");
        let entry = inner.entry(op).or_default();
        let from = entry.state;
        *entry = TypeHealth::default();
        drop(inner);

        let _ = self.events.send(HealthEvent {
            op,
            from,
            to: HealthState::default(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> Thresholds {
        Thresholds::default()
    }

    #[test]
    fn three_failures_reach_failed_from_unknown() {
        let mut state = HealthState::default();
        state = next(state, Outcome::Retryable, t());
        assert_eq!(state, HealthState::Degraded { failures: 1, successes: 0 });
        state = next(state, Outcome::Retryable, t());
        assert_eq!(state, HealthState::Degraded { failures: 2, successes: 0 });
        state = next(state, Outcome::Retryable, t());
        assert!(state.is_failed());
    }

    #[test]
    fn degraded_recovers_after_two_successes() {
        let mut state = HealthState::Degraded { failures: 1, successes: 0 };
        state = next(state, Outcome::Retryable, t());
        state = next(state, Outcome::Success, t());
        assert!(matches!(state, HealthState::Degraded { successes: 1, .. }));
        state = next(state, Outcome::Success, t());
        assert!(state.is_healthy());
    }

    #[test]
    fn unknown_needs_two_successes_for_healthy() {
        let mut state = HealthState::default();
        state = next(state, Outcome::Success, t());
        assert!(!state.is_healthy());
        state = next(state, Outcome::Success, t());
        assert!(state.is_healthy());
    }

    #[test]
    fn failed_steps_back_to_degraded_on_a_single_success() {
        let state = next(HealthState::Failed { failures: 3 }, Outcome::Success, t());
        assert!(matches!(state, HealthState::Degraded { .. }));
    }

    #[test]
    fn terminal_forces_failed_from_anywhere() {
        assert!(next(HealthState::Healthy, Outcome::Terminal, t()).is_failed());
        assert!(next(HealthState::default(), Outcome::Terminal, t()).is_failed());
    }

    #[test]
    fn types_track_independently() {
        let monitor = HealthMonitor::new(t(), Duration::from_secs(60));
        for _ in 0..3 {
            monitor.record(OperationType::Export, Outcome::Retryable);
        }
        assert!(monitor.state(OperationType::Export).is_failed());
        assert_eq!(monitor.state(OperationType::Import), HealthState::default());
        assert!(!monitor.local_only(OperationType::Import));
    }

    #[test]
    fn failed_suppresses_pushes_within_backoff() {
        let monitor = HealthMonitor::new(t(), Duration::from_secs(3600));
        for _ in 0..3 {
            monitor.record(OperationType::Export, Outcome::Retryable);
        }
        assert!(!monitor.push_allowed(OperationType::Export));

        // Backoff elapsed: a probe attempt is allowed again.
        let monitor = HealthMonitor::new(t(), Duration::ZERO);
        for _ in 0..3 {
            monitor.record(OperationType::Export, Outcome::Retryable);
        }
        assert!(monitor.push_allowed(OperationType::Export));
    }

    #[test]
    fn terminal_blocks_until_reset() {
        let monitor = HealthMonitor::new(t(), Duration::ZERO);
        monitor.record(OperationType::Setup, Outcome::Terminal);
        assert!(monitor.is_blocked(OperationType::Setup));
        assert!(!monitor.push_allowed(OperationType::Setup));

        monitor.reset(OperationType::Setup);
        assert!(!monitor.is_blocked(OperationType::Setup));
        assert_eq!(monitor.state(OperationType::Setup), HealthState::default());
    }

    #[tokio::test]
    async fn transitions_are_broadcast() {
        let monitor = HealthMonitor::new(t(), Duration::ZERO);
        let mut events = monitor.subscribe();

        monitor.record(OperationType::Import, Outcome::Retryable);
        let event = events.recv().await.unwrap();
        assert_eq!(event.op, OperationType::Import);
        assert!(matches!(event.to, HealthState::Degraded { .. }));
    }
}
