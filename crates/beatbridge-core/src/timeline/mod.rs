//! Peer timeline seam
//!
//! The network-synchronized peer timeline (tempo, quantum-relative beat grid,
//! play/stop state) consumed as an external capability: capture a snapshot,
//! mutate it locally, commit it back atomically. The synchronization protocol
//! itself (clock negotiation, peer discovery) lives behind this trait and is
//! out of scope here.

mod loopback;

pub use loopback::{LoopbackHandle, LoopbackTimeline};

use crate::clock::DEFAULT_TEMPO;

/// Callback invoked when the number of visible peers changes
pub type PeersCallback = Box<dyn FnMut(usize) + Send>;
/// Callback invoked when a peer changes the shared tempo
pub type TempoCallback = Box<dyn FnMut(f64) + Send>;
/// Callback invoked when a peer starts or stops shared transport
pub type StartStopCallback = Box<dyn FnMut(bool) + Send>;

/// Value-type snapshot of the peer session
///
/// Captured from a [`PeerTimeline`], mutated locally, committed back as one
/// atomic unit. Never held across a blocking operation. The beat grid is
/// modelled as a linear mapping from the timeline clock (microseconds) to a
/// continuous beat count anchored at `beat_origin`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    tempo: f64,
    /// Clock time (µs, possibly fractional) at which beat 0.0 falls
    beat_origin: f64,
    playing: bool,
}

impl SessionSnapshot {
    pub fn new(tempo: f64) -> Self {
        Self {
            // The beat mapping divides by tempo; never admit a degenerate one
            tempo: if tempo > 0.0 { tempo } else { DEFAULT_TEMPO },
            beat_origin: 0.0,
            playing: false,
        }
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Change the tempo, keeping the beat at `at_micros` stable so peers hear
    /// no positional jump. Non-positive requests are ignored.
    pub fn set_tempo(&mut self, bpm: f64, at_micros: i64) {
        if bpm <= 0.0 {
            return;
        }
        let anchor = self.beat_at_time(at_micros, 1.0);
        self.tempo = bpm;
        self.beat_origin = at_micros as f64 - anchor * 60.0e6 / self.tempo;
    }

    /// Continuous beat count at a clock time. `quantum` is accepted for
    /// interface symmetry; the beat count itself is grid-independent.
    pub fn beat_at_time(&self, micros: i64, _quantum: f64) -> f64 {
        (micros as f64 - self.beat_origin) * self.tempo / 60.0e6
    }

    /// Position within the quantum grid at a clock time, in `[0, quantum)`
    pub fn phase_at_time(&self, micros: i64, quantum: f64) -> f64 {
        self.beat_at_time(micros, quantum).rem_euclid(quantum.max(1.0))
    }

    /// Remap the grid so that `beat` falls exactly at `micros`
    ///
    /// This is the abrupt variant: peers observe a phase discontinuity. Used
    /// to phase-lock the session to the local transport when starting.
    pub fn force_beat_at_time(&mut self, beat: f64, micros: i64, _quantum: f64) {
        self.beat_origin = micros as f64 - beat * 60.0e6 / self.tempo;
    }

    /// Remap the grid so that `beat` falls at `micros`, preserving the
    /// session's quantum phase while playing
    ///
    /// While playing, only the beat numbering shifts (by whole quanta); the
    /// audible grid is untouched. While stopped this is the same as
    /// [`force_beat_at_time`](Self::force_beat_at_time).
    pub fn request_beat_at_time(&mut self, beat: f64, micros: i64, quantum: f64) {
        if self.playing {
            let quantum = quantum.max(1.0);
            let current = self.beat_at_time(micros, quantum);
            let shift = ((beat - current) / quantum).round() * quantum;
            // Moving the origin by a whole number of quanta renumbers the
            // beats without moving the audible grid.
            self.beat_origin -= shift * 60.0e6 / self.tempo;
        } else {
            self.force_beat_at_time(beat, micros, quantum);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_is_playing(&mut self, playing: bool, _at_micros: i64) {
        self.playing = playing;
    }
}

/// Capture/mutate/commit interface to the peer synchronization library
///
/// Not realtime-safe: only the reconciliation worker and other non-realtime
/// contexts may call these. Peer-originated changes arrive through the
/// registered callbacks, invoked from the library's own callback context.
pub trait PeerTimeline: Send {
    /// Join or leave the peer session
    fn enable(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Number of other participants currently visible
    fn num_peers(&self) -> usize;

    /// The timeline's monotonic clock, in microseconds
    fn clock_micros(&self) -> i64;

    /// Capture the current session state
    fn capture(&self) -> SessionSnapshot;

    /// Commit a mutated snapshot back to the session, atomically
    fn commit(&mut self, snapshot: SessionSnapshot);

    fn set_num_peers_callback(&mut self, callback: PeersCallback);
    fn set_tempo_callback(&mut self, callback: TempoCallback);
    fn set_start_stop_callback(&mut self, callback: StartStopCallback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_advances_with_tempo() {
        let mut snap = SessionSnapshot::new(120.0);
        snap.force_beat_at_time(0.0, 0, 4.0);
        // 120 bpm = 2 beats per second
        assert!((snap.beat_at_time(1_000_000, 4.0) - 2.0).abs() < 1e-9);
        assert!((snap.beat_at_time(2_500_000, 4.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_tempo_anchors_current_beat() {
        let mut snap = SessionSnapshot::new(120.0);
        snap.force_beat_at_time(0.0, 0, 4.0);
        let at = 3_000_000;
        let before = snap.beat_at_time(at, 4.0);
        snap.set_tempo(140.0, at);
        let after = snap.beat_at_time(at, 4.0);
        assert!((before - after).abs() < 1e-6);
        // Rate changes after the anchor point
        let later = snap.beat_at_time(at + 60_000_000, 4.0);
        assert!((later - (after + 140.0)).abs() < 1e-6);
    }

    #[test]
    fn test_force_beat_at_time() {
        let mut snap = SessionSnapshot::new(120.0);
        snap.force_beat_at_time(-1.5, 10_000_000, 4.0);
        assert!((snap.beat_at_time(10_000_000, 4.0) + 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_request_preserves_phase_while_playing() {
        let mut snap = SessionSnapshot::new(120.0);
        snap.force_beat_at_time(0.3, 0, 4.0);
        snap.set_is_playing(true, 0);

        let at = 7_000_000;
        let phase_before = snap.phase_at_time(at, 4.0);
        snap.request_beat_at_time(100.0, at, 4.0);
        let phase_after = snap.phase_at_time(at, 4.0);

        assert!((phase_before - phase_after).abs() < 1e-6);
        // Numbering lands within half a quantum of the request
        assert!((snap.beat_at_time(at, 4.0) - 100.0).abs() <= 2.0);
    }

    #[test]
    fn test_non_positive_tempo_keeps_beat_math_finite() {
        let mut snap = SessionSnapshot::new(0.0);
        assert_eq!(snap.tempo(), DEFAULT_TEMPO);

        snap.force_beat_at_time(1.0, 1_000_000, 4.0);
        assert!(snap.beat_at_time(2_000_000, 4.0).is_finite());

        // Degenerate requests are dropped, not absorbed into the grid
        snap.set_tempo(-10.0, 0);
        assert_eq!(snap.tempo(), DEFAULT_TEMPO);
        assert!(snap.phase_at_time(3_000_000, 4.0).is_finite());
    }

    #[test]
    fn test_request_is_exact_while_stopped() {
        let mut snap = SessionSnapshot::new(128.0);
        snap.request_beat_at_time(0.0, 5_000_000, 4.0);
        assert!(snap.beat_at_time(5_000_000, 4.0).abs() < 1e-9);
    }
}
