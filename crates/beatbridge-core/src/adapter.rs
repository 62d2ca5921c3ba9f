//! Realtime transport adapter
//!
//! The entry points invoked on the host's processing thread. Strict
//! non-blocking contract: bounded time, no blocking lock acquisition, no
//! allocation on the stamping path. The adapter keeps a private copy of
//! tempo and quantum so a contended `try_lock` only costs one cycle of
//! staleness, never a stall.

use std::sync::{Arc, Mutex, TryLockError};

use crate::clock::{self, DEFAULT_BEAT_TYPE, DEFAULT_TICKS_PER_BEAT};
use crate::state::SharedState;
use crate::timeline::PeerTimeline;

/// Previously stamped musical metadata supplied back by the host, if any
#[derive(Debug, Clone, Copy)]
pub struct HostBbt {
    pub ticks_per_beat: f64,
    pub beat_type: f32,
}

/// Musical coordinates written into the host's position record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionStamp {
    pub bar: i32,
    pub beat: i32,
    pub tick: i32,
    pub beats_per_bar: f32,
    pub ticks_per_beat: f64,
    pub beats_per_minute: f64,
    pub beat_type: f32,
}

/// State owned by the realtime side of the bridge
pub struct TransportAdapter {
    shared: Arc<SharedState>,
    /// Last tempo/quantum seen under a successful try-lock; reused on misses
    tempo: f64,
    quantum: f64,
    /// Sticky host-supplied metadata, defaulted until the host provides it
    ticks_per_beat: f64,
    beat_type: f32,
    /// Edge-triggered relocation counter; non-zero once this process has
    /// stamped after a position jump and therefore owns the timebase role
    relocations: u32,
}

impl TransportAdapter {
    /// Construct off the realtime thread (takes the blocking lock once to
    /// seed the cache)
    pub fn new(shared: Arc<SharedState>) -> Self {
        let (tempo, quantum) = {
            let state = shared.lock();
            (state.tempo, state.quantum)
        };
        Self {
            shared,
            tempo,
            quantum,
            ticks_per_beat: DEFAULT_TICKS_PER_BEAT,
            beat_type: DEFAULT_BEAT_TYPE,
            relocations: 0,
        }
    }

    /// Position-stamp entry, invoked once per timebase request
    ///
    /// Applies a pending tempo request if the lock is free (skipped and
    /// retried next cycle otherwise), then derives the musical position for
    /// the host's raw frame.
    pub fn stamp_position(
        &mut self,
        frame: u64,
        frame_rate: f64,
        host_bbt: Option<HostBbt>,
        new_pos: bool,
    ) -> PositionStamp {
        if let Some(mut state) = self.shared.try_lock() {
            if state.tempo_pending > 0.0 {
                state.tempo = state.tempo_pending;
                state.tempo_pending = 0.0;
            }
            self.tempo = state.tempo;
            self.quantum = state.quantum;
        }

        if let Some(bbt) = host_bbt {
            if bbt.ticks_per_beat > 0.0 {
                self.ticks_per_beat = bbt.ticks_per_beat;
                self.beat_type = bbt.beat_type;
            }
        }

        if new_pos {
            self.relocations = self.relocations.wrapping_add(1);
        }

        let position = clock::position_from_frame(
            frame,
            frame_rate,
            self.tempo,
            self.quantum,
            self.ticks_per_beat,
        );

        PositionStamp {
            bar: position.bar,
            beat: position.beat,
            tick: position.tick,
            beats_per_bar: self.quantum.max(1.0) as f32,
            ticks_per_beat: self.ticks_per_beat,
            beats_per_minute: self.tempo,
            beat_type: self.beat_type,
        }
    }

    /// Number of position jumps stamped so far
    pub fn relocation_count(&self) -> u32 {
        self.relocations
    }
}

/// Beat and tick of a quantized host position, for phase derivation
#[derive(Debug, Clone, Copy)]
pub struct QuantizedPosition {
    pub beat: i32,
    pub tick: i32,
    pub ticks_per_beat: f64,
}

/// Transport-start gate, invoked while the host proposes starting playback
///
/// With no peers on the session the gate is transparent: there is nothing to
/// align against and the transport starts immediately. Otherwise it returns
/// `false` (not yet ready) while the locally desired play state disagrees
/// with the host's proposal or a self-initiated transition has not
/// round-tripped through the peer timeline. Once aligned, performs a single
/// capture → force-beat-at-time → commit to phase-lock the peer session to
/// the engine's current beat phase, then reports ready. Uses try-locks only:
/// contention means "not yet" and the host retries next cycle.
pub fn transport_start_gate(
    shared: &SharedState,
    timeline: &Mutex<Box<dyn PeerTimeline>>,
    frame: u64,
    frame_rate: f64,
    position: Option<QuantizedPosition>,
) -> bool {
    let Some(state) = shared.try_lock() else {
        return false;
    };
    if state.peer_count == 0 {
        return true;
    }
    if !state.playing || state.playing_pending {
        return false;
    }

    let mut timeline = match timeline.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return false,
    };

    let phase = match position {
        Some(pos) => {
            clock::beat_phase_from_position(pos.beat, pos.tick, pos.ticks_per_beat, state.quantum)
        }
        None => clock::beat_phase_from_frame(frame, frame_rate, state.tempo, state.quantum),
    };

    let now = timeline.clock_micros();
    let mut snapshot = timeline.capture();
    snapshot.force_beat_at_time(phase, now, state.quantum);
    snapshot.set_is_playing(true, now);
    timeline.commit(snapshot);

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::LoopbackTimeline;

    fn adapter_with_state(tempo: f64, quantum: f64) -> (Arc<SharedState>, TransportAdapter) {
        let shared = Arc::new(SharedState::new(tempo, quantum));
        let adapter = TransportAdapter::new(shared.clone());
        (shared, adapter)
    }

    #[test]
    fn test_stamp_uses_defaults_without_host_bbt() {
        let (_, mut adapter) = adapter_with_state(120.0, 4.0);
        let stamp = adapter.stamp_position(96_000, 48_000.0, None, false);
        assert_eq!(stamp.ticks_per_beat, DEFAULT_TICKS_PER_BEAT);
        assert_eq!(stamp.beat_type, DEFAULT_BEAT_TYPE);
        assert_eq!(stamp.bar, 2);
        assert_eq!(stamp.beat, 1);
        assert_eq!(stamp.tick, 0);
        assert_eq!(stamp.beats_per_minute, 120.0);
        assert_eq!(stamp.beats_per_bar, 4.0);
    }

    #[test]
    fn test_host_bbt_is_sticky() {
        let (_, mut adapter) = adapter_with_state(120.0, 4.0);
        let host = HostBbt {
            ticks_per_beat: 1920.0,
            beat_type: 8.0,
        };
        let stamp = adapter.stamp_position(0, 48_000.0, Some(host), false);
        assert_eq!(stamp.ticks_per_beat, 1920.0);
        // Preserved on later cycles without valid host metadata
        let stamp = adapter.stamp_position(1024, 48_000.0, None, false);
        assert_eq!(stamp.ticks_per_beat, 1920.0);
        assert_eq!(stamp.beat_type, 8.0);
    }

    #[test]
    fn test_pending_tempo_applied_and_cleared() {
        let (shared, mut adapter) = adapter_with_state(120.0, 4.0);
        shared.lock().tempo_pending = 128.0;

        let stamp = adapter.stamp_position(0, 48_000.0, None, false);
        assert_eq!(stamp.beats_per_minute, 128.0);

        let state = shared.lock();
        assert_eq!(state.tempo, 128.0);
        assert_eq!(state.tempo_pending, 0.0);
    }

    #[test]
    fn test_pending_tempo_skipped_under_contention() {
        let (shared, mut adapter) = adapter_with_state(120.0, 4.0);

        {
            let mut held = shared.lock();
            held.tempo_pending = 128.0;
            // Lock held: the stamp must fall back to its cached tempo
            let stamp = adapter.stamp_position(0, 48_000.0, None, false);
            assert_eq!(stamp.beats_per_minute, 120.0);
            assert_eq!(held.tempo_pending, 128.0);
        }

        // Next cycle, lock free: pending applies
        let stamp = adapter.stamp_position(0, 48_000.0, None, false);
        assert_eq!(stamp.beats_per_minute, 128.0);
    }

    #[test]
    fn test_relocation_counter() {
        let (_, mut adapter) = adapter_with_state(120.0, 4.0);
        assert_eq!(adapter.relocation_count(), 0);
        adapter.stamp_position(0, 48_000.0, None, true);
        adapter.stamp_position(512, 48_000.0, None, false);
        adapter.stamp_position(0, 48_000.0, None, true);
        assert_eq!(adapter.relocation_count(), 2);
    }

    fn boxed_loopback(tempo: f64) -> Mutex<Box<dyn PeerTimeline>> {
        Mutex::new(Box::new(LoopbackTimeline::new(tempo)))
    }

    #[test]
    fn test_gate_transparent_without_peers() {
        let shared = SharedState::new(120.0, 4.0);
        let timeline = boxed_loopback(120.0);

        // Alone on the session: ready at once, and no phase-lock commit
        assert!(transport_start_gate(&shared, &timeline, 0, 48_000.0, None));
        assert!(!timeline.lock().unwrap().capture().is_playing());
    }

    #[test]
    fn test_gate_defers_until_play_confirmed() {
        let shared = SharedState::new(120.0, 4.0);
        let timeline = boxed_loopback(120.0);
        shared.lock().peer_count = 1;

        // Not playing at all
        assert!(!transport_start_gate(&shared, &timeline, 0, 48_000.0, None));

        // Requested but not yet confirmed by the peer layer
        {
            let mut state = shared.lock();
            state.playing = true;
            state.playing_pending = true;
        }
        assert!(!transport_start_gate(&shared, &timeline, 0, 48_000.0, None));

        // Confirmed: ready
        shared.lock().playing_pending = false;
        assert!(transport_start_gate(&shared, &timeline, 0, 48_000.0, None));
    }

    #[test]
    fn test_gate_phase_locks_session() {
        let shared = SharedState::new(120.0, 4.0);
        let timeline = boxed_loopback(120.0);
        {
            let mut state = shared.lock();
            state.peer_count = 1;
            state.playing = true;
        }

        // 1.5 beats into the bar: 36000 frames at 48kHz and 120 bpm
        assert!(transport_start_gate(&shared, &timeline, 36_000, 48_000.0, None));

        let guard = timeline.lock().unwrap();
        let now = guard.clock_micros();
        let snapshot = guard.capture();
        assert!(snapshot.is_playing());
        // Session beat at commit time matches the local phase (1.5 - 4.0)
        let expected = clock::beat_phase_from_frame(36_000, 48_000.0, 120.0, 4.0);
        assert!((snapshot.beat_at_time(now, 4.0) - expected).abs() < 0.05);
    }

    #[test]
    fn test_gate_not_ready_when_state_contended() {
        let shared = SharedState::new(120.0, 4.0);
        let timeline = boxed_loopback(120.0);
        {
            let mut state = shared.lock();
            state.peer_count = 1;
            state.playing = true;
        }

        let held = shared.lock();
        assert!(!transport_start_gate(&shared, &timeline, 0, 48_000.0, None));
        drop(held);
        assert!(transport_start_gate(&shared, &timeline, 0, 48_000.0, None));
    }
}
