//! Shared reconciliation state
//!
//! The cross-thread record of observed tempo, quantum, peer count and
//! play/stop state, plus the pending-request flags used for echo
//! suppression. Guarded by a single mutex; a condition variable wakes the
//! reconciliation worker early when a peer callback lands and signals
//! shutdown.
//!
//! Three contexts touch this state (see the crate docs): the realtime
//! transport adapter (non-blocking `try_lock` only), the reconciliation
//! worker (blocking lock holder) and the peer library's callback context
//! (blocking lock).

use std::sync::{Condvar, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use crate::clock::DEFAULT_TEMPO;

/// Mutable reconciliation record
///
/// Invariants:
/// - `tempo_pending` is either 0.0 (none) or a tempo awaiting application on
///   the realtime thread; it is cleared the instant it is consumed.
/// - `playing_pending` is true exactly while a play/stop transition initiated
///   by this process has not yet round-tripped through the peer timeline.
#[derive(Debug, Clone, Copy)]
pub struct LinkState {
    /// Current tempo in beats per minute (always > 0)
    pub tempo: f64,
    /// Tempo requested by a peer or the user, 0.0 when none is pending
    pub tempo_pending: f64,
    /// Beats per bar used as the peer phase-alignment grid (>= 1)
    pub quantum: f64,
    /// Number of peers currently visible on the shared timeline
    pub peer_count: usize,
    /// Desired/confirmed play state
    pub playing: bool,
    /// Echo-suppression window for a self-initiated play/stop transition
    pub playing_pending: bool,
    /// Cleared to request cooperative worker shutdown
    pub running: bool,
}

impl LinkState {
    fn new(tempo: f64, quantum: f64) -> Self {
        Self {
            // Non-positive tempo would poison every beat computation
            tempo: if tempo > 0.0 { tempo } else { DEFAULT_TEMPO },
            tempo_pending: 0.0,
            quantum: quantum.max(1.0),
            peer_count: 0,
            playing: false,
            playing_pending: false,
            running: false,
        }
    }
}

/// Mutex + condvar pair owning the [`LinkState`]
pub struct SharedState {
    state: Mutex<LinkState>,
    cond: Condvar,
}

impl SharedState {
    pub fn new(tempo: f64, quantum: f64) -> Self {
        Self {
            state: Mutex::new(LinkState::new(tempo, quantum)),
            cond: Condvar::new(),
        }
    }

    /// Blocking lock. Never call from the realtime thread.
    ///
    /// A poisoned lock is recovered: the state is plain-old-data and stays
    /// internally consistent even if a holder panicked.
    pub fn lock(&self) -> MutexGuard<'_, LinkState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Non-blocking lock attempt for realtime callers
    ///
    /// Returns `None` when the worker or a callback currently holds the lock;
    /// the caller skips this cycle and retries on the next one.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, LinkState>> {
        match self.state.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Wait on the condition variable with a timeout, returning the reacquired
    /// guard. Spurious wakeups are fine: the worker re-evaluates either way.
    pub fn wait_timeout<'a>(
        &'a self,
        guard: MutexGuard<'a, LinkState>,
        timeout: Duration,
    ) -> MutexGuard<'a, LinkState> {
        match self.cond.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    /// Wake the worker so it re-evaluates promptly instead of waiting out the
    /// full poll interval
    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Request cooperative worker shutdown: clear `running` under the lock
    /// and wake every waiter
    pub fn request_stop(&self) {
        let mut state = self.lock();
        state.running = false;
        drop(state);
        self.cond.notify_all();
    }
}
