//! Reconciliation worker
//!
//! Background loop, independent of the audio thread, that polls the host
//! transport for divergence from the shared state and re-publishes corrected
//! state to the peer timeline. Holds the blocking lock for the duration of
//! each pass; the realtime adapter only ever competes with a try-lock.
//!
//! Shutdown is cooperative: `stop()` clears `running` under the lock,
//! signals the condition variable and joins the thread. The worker always
//! finishes its current pass before observing the stop flag.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock;
use crate::host::TransportHost;
use crate::state::{LinkState, SharedState};
use crate::timeline::PeerTimeline;

/// Divergence below this is floating-point jitter, not a correction
pub const SYNC_TOLERANCE: f64 = 0.01;

/// Default poll interval between reconciliation passes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to the reconciliation thread
///
/// Owns the join handle; dropping the worker stops and joins it. Never drop
/// from a realtime context.
pub struct ReconciliationWorker {
    shared: Arc<SharedState>,
    handle: Option<JoinHandle<()>>,
}

impl ReconciliationWorker {
    /// Spawn the worker loop
    pub fn start(
        shared: Arc<SharedState>,
        host: Arc<dyn TransportHost>,
        timeline: Arc<Mutex<Box<dyn PeerTimeline>>>,
        poll_interval: Duration,
    ) -> Self {
        shared.lock().running = true;

        let loop_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("reconciliation".into())
            .spawn(move || {
                log::info!("reconciliation worker started");
                let mut guard = loop_shared.lock();
                loop {
                    if !guard.running {
                        break;
                    }
                    run_pass(&mut guard, host.as_ref(), &timeline);
                    guard = loop_shared.wait_timeout(guard, poll_interval);
                }
                log::info!("reconciliation worker stopped");
            })
            .expect("Failed to spawn reconciliation worker");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Request cooperative shutdown and join the thread
    pub fn stop(&mut self) {
        self.shared.request_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ReconciliationWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One reconciliation pass, executed under the shared-state lock
///
/// Compares the host's observed tempo, quantum and play state against the
/// shared record. Genuine divergences (beyond tolerance, not caused by this
/// process's own pending request) are folded into a single captured
/// snapshot and committed atomically.
pub(crate) fn run_pass(
    state: &mut LinkState,
    host: &dyn TransportHost,
    timeline: &Mutex<Box<dyn PeerTimeline>>,
) {
    // Nothing to reconcile against without peers
    if state.peer_count == 0 {
        return;
    }

    let observed = host.query();

    let mut tempo_correction = None;
    let mut quantum_correction = None;
    if let Some(bbt) = observed.bbt {
        if bbt.beats_per_minute > 0.0 && (state.tempo - bbt.beats_per_minute).abs() > SYNC_TOLERANCE
        {
            tempo_correction = Some(bbt.beats_per_minute);
        }
        if bbt.beats_per_bar >= 1.0 && (state.quantum - bbt.beats_per_bar).abs() > SYNC_TOLERANCE {
            quantum_correction = Some(bbt.beats_per_bar);
        }
    }

    let mut play_correction = None;
    if observed.rolling != state.playing {
        if state.playing_pending {
            // Our own request still settling through the peer layer; consume
            // the mismatch instead of re-broadcasting it.
            state.playing_pending = false;
        } else {
            play_correction = Some(observed.rolling);
        }
    }

    if tempo_correction.is_none() && quantum_correction.is_none() && play_correction.is_none() {
        return;
    }

    let mut timeline = match timeline.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let now = timeline.clock_micros();
    let mut snapshot = timeline.capture();

    if let Some(bpm) = tempo_correction {
        log::info!("publishing tempo {:.2} -> {:.2} bpm", state.tempo, bpm);
        state.tempo = bpm;
        snapshot.set_tempo(bpm, now);
    }

    if let Some(quantum) = quantum_correction {
        log::info!("publishing quantum {:.2} -> {:.2}", state.quantum, quantum);
        state.quantum = quantum;
        if state.playing {
            // Re-phase at the current beat so the grid change is seamless
            let beats = clock::beats_from_frame(observed.frame, observed.frame_rate, state.tempo);
            snapshot.force_beat_at_time(beats, now, quantum);
        } else {
            snapshot.request_beat_at_time(0.0, now, quantum);
        }
    }

    if let Some(playing) = play_correction {
        log::info!("publishing transport {}", if playing { "start" } else { "stop" });
        state.playing = playing;
        // Echo-suppression window: the reflected change must not re-trigger
        state.playing_pending = true;
        if playing {
            let phase = match observed.bbt {
                Some(bbt) => clock::beat_phase_from_position(
                    bbt.beat,
                    bbt.tick,
                    bbt.ticks_per_beat,
                    state.quantum,
                ),
                None => clock::beat_phase_from_frame(
                    observed.frame,
                    observed.frame_rate,
                    state.tempo,
                    state.quantum,
                ),
            };
            snapshot.force_beat_at_time(phase, now, state.quantum);
        }
        snapshot.set_is_playing(playing, now);
    }

    timeline.commit(snapshot);
}
